//! Wall-clock agent: publishes the current Unix time.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{self, AgentConfig};
use crate::sink::Sink;

use super::Agent;

/// Publishes the current Unix time, in seconds, as a single gauge at the
/// configured path. Stateless: no warm-up tick is needed.
pub struct TimeAgent {
    config: AgentConfig,
}

/// The time agent takes no settings; unexpected keys are a configuration error.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct Settings {}

pub fn build(config: AgentConfig) -> anyhow::Result<Box<dyn Agent>> {
    let _: Settings = config::deserialize_settings(&config.settings).context("invalid time agent settings")?;
    Ok(Box::new(TimeAgent { config }))
}

impl Agent for TimeAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn tick(&mut self, sink: &dyn Sink) -> anyhow::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is set before the unix epoch")?;
        sink.gauge(&self.config.path, now.as_secs_f64());
        Ok(())
    }
}
