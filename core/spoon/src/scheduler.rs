//! Drives the agents: every enabled agent once, or periodic loops until shutdown.

use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::sink::Sink;

/// Schedules a set of agents against a shared sink.
///
/// The sink is the only resource shared across agents; each agent's sampling
/// state is owned exclusively by its own loop.
pub struct Scheduler {
    agents: Vec<Box<dyn Agent>>,
    sink: Arc<dyn Sink>,
}

/// Error returned by [`Scheduler::run_once`] when at least one agent failed.
#[derive(Debug, Error)]
#[error("{failed} of {total} agent ticks failed")]
pub struct RunOnceError {
    pub failed: usize,
    pub total: usize,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { agents: Vec::new(), sink }
    }

    pub fn add_agent(&mut self, agent: Box<dyn Agent>) {
        self.agents.push(agent);
    }

    /// Ticks every enabled agent exactly once, concurrently, and waits for all
    /// of them to finish.
    ///
    /// One agent's failure never stops another's tick. Succeeds only if every
    /// enabled agent succeeded; otherwise the error downcasts to
    /// [`RunOnceError`]. Disabled agents are skipped.
    pub fn run_once(self) -> anyhow::Result<()> {
        let Scheduler { agents, sink } = self;
        let rt = Runtime::new().context("failed to start the async runtime")?;
        rt.block_on(async move {
            let mut ticks = JoinSet::new();
            let mut total = 0;
            for mut agent in agents {
                if !agent.config().enabled {
                    log::debug!("skipping disabled agent {}", agent_label(agent.config()));
                    continue;
                }
                total += 1;
                let sink = Arc::clone(&sink);
                ticks.spawn(async move {
                    let label = agent_label(agent.config());
                    (label, agent.tick(sink.as_ref()))
                });
            }

            let mut failed = 0;
            while let Some(joined) = ticks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => (),
                    Ok((label, Err(e))) => {
                        log::error!("agent {label} failed to tick: {e:#}");
                        failed += 1;
                    }
                    Err(e) => {
                        log::error!("an agent tick task panicked: {e}");
                        failed += 1;
                    }
                }
            }

            if failed > 0 {
                Err(RunOnceError { failed, total }.into())
            } else {
                Ok(())
            }
        })
    }

    /// Spawns one independent periodic loop per enabled agent and returns a
    /// handle to the running loops.
    ///
    /// Each loop ticks its agent once per elapsed interval, forever, until
    /// [`RunningAgents::shutdown`] (or the Ctrl+C listener) cancels them. A
    /// tick error is logged and the loop carries on; a slow agent delays only
    /// itself. No timeout is imposed on an individual tick, so a sampling
    /// source that hangs stalls its own loop indefinitely without affecting
    /// sibling agents.
    pub fn start(self) -> anyhow::Result<RunningAgents> {
        let Scheduler { agents, sink } = self;
        let rt = Runtime::new().context("failed to start the async runtime")?;
        let shutdown = CancellationToken::new();

        let mut task_set = JoinSet::new();
        for agent in agents {
            if !agent.config().enabled {
                log::debug!("skipping disabled agent {}", agent_label(agent.config()));
                continue;
            }
            let task = run_agent_loop(agent, Arc::clone(&sink), shutdown.clone());
            task_set.spawn_on(task, rt.handle());
        }

        Ok(RunningAgents { rt, task_set, shutdown })
    }
}

/// The periodic loops spawned by [`Scheduler::start`].
pub struct RunningAgents {
    // Keep the tokio runtime alive for as long as the loops run.
    rt: Runtime,
    task_set: JoinSet<()>,
    shutdown: CancellationToken,
}

impl RunningAgents {
    /// Requests every agent loop to stop.
    ///
    /// Best effort: a tick already in progress finishes on its own, but no new
    /// ticks are started. Losing a single in-flight sample is inconsequential
    /// for a metrics collector.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Installs a Ctrl+C listener that triggers [`shutdown`](Self::shutdown).
    pub fn shutdown_on_ctrl_c(&self) {
        let token = self.shutdown.clone();
        self.rt.spawn(async move {
            tokio::signal::ctrl_c().await.expect("failed to listen for signal event");
            log::info!("Termination signal received, shutting down...");
            token.cancel();
        });
    }

    /// Blocks until every agent loop has stopped.
    pub fn wait_for_shutdown(self) {
        let RunningAgents { rt, mut task_set, .. } = self;
        rt.block_on(async {
            while let Some(joined) = task_set.join_next().await {
                if let Err(e) = joined {
                    log::error!("an agent loop panicked: {e}");
                }
            }
        });
        log::debug!("all agent loops stopped");
    }
}

/// One agent's periodic loop: wait for the next interval tick or for shutdown,
/// whichever comes first.
async fn run_agent_loop(mut agent: Box<dyn Agent>, sink: Arc<dyn Sink>, shutdown: CancellationToken) {
    let label = agent_label(agent.config());
    let period = agent.config().interval();

    // The first tick happens one full interval after start. Delay (rather than
    // burst) when a tick overruns the interval.
    let mut timer = time::interval_at(time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::debug!("agent {label} scheduled every {period:?}");
    loop {
        tokio::select! {
            biased; // check for shutdown first

            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {
                log::trace!("ticking agent {label}");
                if let Err(e) = agent.tick(sink.as_ref()) {
                    log::error!("agent {label} failed to tick (will retry at the next interval): {e:#}");
                }
            }
        }
    }
    log::debug!("agent {label} stopped");
}

fn agent_label(config: &AgentConfig) -> String {
    format!("'{}' ({})", config.kind, config.path)
}
