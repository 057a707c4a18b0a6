//! Per-core CPU utilization agent.
//!
//! Reads the cumulative CPU time counters from `/proc/stat` and converts the
//! difference between two consecutive samples into a busy percentage per core.

use std::fs::File;
use std::io::{BufReader, Seek};
use std::time::Instant;

use anyhow::Context;
use procfs::{CpuTime, CurrentSI, ExplicitSystemInfo, FromBufReadSI, KernelStats, LocalSystemInfo, ProcError, SystemInfoInterface};
use serde::{Deserialize, Serialize};

use crate::config::{self, AgentConfig};
use crate::sink::Sink;

use super::Agent;

/// Publishes one `<path>.<core>.cpu_percent` gauge per core and tick.
///
/// The first tick after construction stores a baseline sample and publishes
/// nothing; every following tick publishes the busy percentage over the
/// elapsed interval for each core present in both samples.
pub struct CpuAgent {
    config: AgentConfig,

    /// A reader opened to the stat file.
    reader: BufReader<File>,
    sysinfo: ExplicitSystemInfo,

    /// The previously observed counters, to compute the difference.
    previous: Option<Snapshot>,
}

/// Cumulative counters of one sample, indexed by logical core.
struct Snapshot {
    totals: Vec<f64>,
    busys: Vec<f64>,
    taken_at: Instant,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct Settings {
    /// File to read the CPU time counters from, in the format of `/proc/stat`.
    #[serde(default = "default_stat_file")]
    stat_file: String,
}

fn default_stat_file() -> String {
    String::from(KernelStats::PATH)
}

pub fn build(config: AgentConfig) -> anyhow::Result<Box<dyn Agent>> {
    let settings: Settings = config::deserialize_settings(&config.settings).context("invalid cpu agent settings")?;
    Ok(Box::new(CpuAgent::from_stat_file(config, &settings.stat_file)?))
}

fn gather_system_info() -> Result<ExplicitSystemInfo, ProcError> {
    let sysinfo = LocalSystemInfo;
    Ok(ExplicitSystemInfo {
        boot_time_secs: sysinfo.boot_time_secs()?,
        ticks_per_second: sysinfo.ticks_per_second(),
        page_size: sysinfo.page_size(),
        is_little_endian: sysinfo.is_little_endian(),
    })
}

impl CpuAgent {
    /// Creates an agent that samples CPU time counters from the given
    /// `/proc/stat`-formatted file.
    pub fn from_stat_file(config: AgentConfig, path: &str) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("could not open {path}"))?;
        Ok(Self {
            config,
            reader: BufReader::new(file),
            sysinfo: gather_system_info().context("could not gather system info")?,
            previous: None,
        })
    }
}

impl Agent for CpuAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn tick(&mut self, sink: &dyn Sink) -> anyhow::Result<()> {
        self.reader.rewind().context("could not rewind the stat file")?;
        let stats = KernelStats::from_buf_read(&mut self.reader, &self.sysinfo)
            .context("could not parse the CPU time counters")?;
        let now = Instant::now();

        let mut totals = Vec::with_capacity(stats.cpu_time.len());
        let mut busys = Vec::with_capacity(stats.cpu_time.len());
        for times in &stats.cpu_time {
            let total = cumulative_total(times);
            totals.push(total);
            busys.push(total - times.idle as f64);
        }

        if let Some(prev) = &self.previous {
            log::trace!(
                "{}: comparing with the sample taken {:?} ago",
                self.config.path,
                now.duration_since(prev.taken_at)
            );
            // Cores only present in the longer of the two samples have no
            // baseline yet and must wait for the next tick.
            for i in 0..totals.len().min(prev.totals.len()) {
                let percent = busy_percent(prev.totals[i], totals[i], prev.busys[i], busys[i]);
                sink.gauge(&format!("{}.{i}.cpu_percent", self.config.path), percent);
            }
        }

        self.previous = Some(Snapshot {
            totals,
            busys,
            taken_at: now,
        });
        Ok(())
    }
}

/// Sums the cumulative time a core has spent in every accounted state.
///
/// Guest time is excluded: the kernel already includes it in the user counter.
fn cumulative_total(times: &CpuTime) -> f64 {
    let accounted = times.user
        + times.nice
        + times.system
        + times.idle
        + times.iowait.unwrap_or(0)
        + times.irq.unwrap_or(0)
        + times.softirq.unwrap_or(0)
        + times.steal.unwrap_or(0);
    accounted as f64
}

/// Converts two cumulative (total, busy) counter samples into a busy percentage.
///
/// Cumulative OS counters can wrap, reset or tick at a coarser granularity than
/// the sampling interval, so the degenerate cases are deliberate:
/// - busy did not increase: report idle (`0`), not an error;
/// - busy increased but total did not: report saturated (`1`), not an error.
///
/// Never divides by zero and never yields a negative or NaN result.
pub fn busy_percent(prev_total: f64, cur_total: f64, prev_busy: f64, cur_busy: f64) -> f64 {
    if cur_busy <= prev_busy {
        return 0.0;
    }
    if cur_total <= prev_total {
        return 1.0;
    }
    ((cur_busy - prev_busy) / (cur_total - prev_total)) * 100.0
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::config::AgentConfig;
    use crate::test::RecordingSink;

    use super::{build, busy_percent};

    #[test]
    fn busy_percent_edge_cases() {
        let cases = vec![
            // (prev_total, cur_total, prev_busy, cur_busy, expected)
            (100.0, 110.0, 50.0, 50.0, 0.0),  // no work done
            (100.0, 110.0, 50.0, 40.0, 0.0),  // busy counter reset
            (100.0, 100.0, 50.0, 55.0, 1.0),  // total stood still
            (100.0, 90.0, 50.0, 55.0, 1.0),   // total went backwards
            (100.0, 110.0, 50.0, 55.0, 50.0), // normal
            (100.0, 110.0, 50.0, 60.0, 100.0),
            (0.0, 0.0, 0.0, 0.0, 0.0),
        ];
        for (prev_total, cur_total, prev_busy, cur_busy, expected) in cases {
            let got = busy_percent(prev_total, cur_total, prev_busy, cur_busy);
            assert_eq!(
                got, expected,
                "busy_percent({prev_total}, {cur_total}, {prev_busy}, {cur_busy})"
            );
        }
    }

    #[test]
    fn busy_percent_two_core_scenario() {
        assert_eq!(busy_percent(100.0, 110.0, 50.0, 55.0), 50.0);
        assert_eq!(busy_percent(100.0, 105.0, 60.0, 65.0), 100.0);
    }

    fn config(stat_file: &str) -> AgentConfig {
        let settings = toml::Table::from_iter([(
            String::from("stat_file"),
            toml::Value::String(stat_file.to_owned()),
        )]);
        AgentConfig {
            enabled: true,
            kind: String::from("cpu"),
            interval: 30.0,
            path: String::from("spoon.cpu"),
            settings,
        }
    }

    // Two cores: totals [100, 100], busys [50, 60].
    const SAMPLE_1: &str = "\
cpu  70 0 40 90 0 0 0 0 0 0
cpu0 30 0 20 50 0 0 0 0 0 0
cpu1 40 0 20 40 0 0 0 0 0 0
ctxt 100
btime 1600000000
processes 10
procs_running 1
procs_blocked 0
";

    // One second later: totals [110, 105], busys [55, 65].
    const SAMPLE_2: &str = "\
cpu  77 0 43 95 0 0 0 0 0 0
cpu0 33 0 22 55 0 0 0 0 0 0
cpu1 44 0 21 40 0 0 0 0 0 0
ctxt 200
btime 1600000000
processes 20
procs_running 1
procs_blocked 0
";

    // Back down to a single core.
    const SAMPLE_3: &str = "\
cpu  80 0 45 100 0 0 0 0 0 0
cpu0 35 0 23 60 0 0 0 0 0 0
ctxt 300
btime 1600000000
processes 30
procs_running 1
procs_blocked 0
";

    #[test]
    fn first_tick_stores_a_baseline_and_publishes_nothing() {
        let stat = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(stat.path(), SAMPLE_1).unwrap();

        let mut agent = build(config(stat.path().to_str().unwrap())).unwrap();
        let sink = RecordingSink::new();
        agent.tick(&sink).unwrap();
        assert_eq!(sink.gauges(), vec![]);
    }

    #[test]
    fn second_tick_publishes_one_gauge_per_core() {
        let stat = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(stat.path(), SAMPLE_1).unwrap();

        let mut agent = build(config(stat.path().to_str().unwrap())).unwrap();
        let sink = RecordingSink::new();
        agent.tick(&sink).unwrap();

        std::fs::write(stat.path(), SAMPLE_2).unwrap();
        agent.tick(&sink).unwrap();

        assert_eq!(
            sink.gauges(),
            vec![
                (String::from("spoon.cpu.0.cpu_percent"), 50.0),
                (String::from("spoon.cpu.1.cpu_percent"), 100.0),
            ]
        );
    }

    #[test]
    fn only_the_overlapping_cores_are_compared() {
        let stat = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(stat.path(), SAMPLE_2).unwrap();

        let mut agent = build(config(stat.path().to_str().unwrap())).unwrap();
        let sink = RecordingSink::new();
        agent.tick(&sink).unwrap();

        // The second core disappears: its index is skipped, not a fault.
        std::fs::write(stat.path(), SAMPLE_3).unwrap();
        agent.tick(&sink).unwrap();
        assert_eq!(sink.gauges().len(), 1);

        // It comes back: no baseline for it yet, so still only core 0.
        std::fs::write(stat.path(), SAMPLE_1).unwrap();
        agent.tick(&sink).unwrap();
        assert_eq!(sink.gauges().len(), 2);
        assert!(sink.gauges().iter().all(|(path, _)| path == "spoon.cpu.0.cpu_percent"));
    }

    #[test]
    fn missing_stat_file_fails_construction() {
        let err = build(config("/does/not/exist/stat")).err().unwrap();
        assert!(err.to_string().contains("could not open"));
    }
}
