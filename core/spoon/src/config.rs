//! Configuration of the daemon, its sink and its agents.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Namespace prepended to agent paths that start with a dot.
    pub base_path: String,
    /// Where the gathered measurements are sent.
    pub sink: SinkConfig,
    /// The collection agents to run.
    pub agents: Vec<AgentConfig>,
}

/// Configuration of a single collection agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Disabled agents are built but never scheduled.
    pub enabled: bool,
    /// Selects the concrete agent implementation, e.g. `"time"` or `"cpu"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Seconds between two ticks of this agent. Must be positive when the agent is enabled.
    pub interval: f64,
    /// Dot-delimited namespace that the agent publishes under.
    /// A leading dot is resolved against `base_path`.
    pub path: String,
    /// Agent-specific settings, validated by the agent constructor.
    #[serde(default)]
    pub settings: toml::Table,
}

/// Configuration of the metric sink.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Selects the concrete sink implementation, e.g. `"statsd"` or `"log"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sink-specific settings, validated when the sink is built.
    #[serde(default)]
    pub settings: toml::Table,
}

/// Error which can occur when reading the configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Error which can occur during [`Config::clean_and_validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent #{index} ('{kind}') is enabled but its interval is {interval}, expected a positive number of seconds")]
    BadInterval { index: usize, kind: String, interval: f64 },
    #[error("agent #{index} ('{kind}') is enabled but its path is empty")]
    EmptyPath { index: usize, kind: String },
    #[error("agent #{index} ('{kind}') has the relative path '{path}' but base_path is empty")]
    NoBasePath { index: usize, kind: String, path: String },
}

impl Config {
    /// Reads and parses the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.to_owned(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolves relative agent paths against `base_path` and checks the per-agent invariants.
    ///
    /// Disabled agents are left untouched: the invariants only bind when an agent is enabled.
    pub fn clean_and_validate(&mut self) -> Result<(), ConfigError> {
        for (index, agent) in self.agents.iter_mut().enumerate() {
            if !agent.enabled {
                continue;
            }
            if agent.path.starts_with('.') {
                if self.base_path.is_empty() {
                    return Err(ConfigError::NoBasePath {
                        index,
                        kind: agent.kind.clone(),
                        path: agent.path.clone(),
                    });
                }
                agent.path = format!("{}{}", self.base_path, agent.path);
            }
            if agent.path.is_empty() {
                return Err(ConfigError::EmptyPath {
                    index,
                    kind: agent.kind.clone(),
                });
            }
            if !(agent.interval.is_finite() && agent.interval > 0.0) {
                return Err(ConfigError::BadInterval {
                    index,
                    kind: agent.kind.clone(),
                    interval: agent.interval,
                });
            }
        }
        Ok(())
    }

    /// An example configuration, used by `spoon config generate`.
    pub fn example() -> Config {
        let statsd_settings = toml::Table::from_iter([(
            String::from("address"),
            toml::Value::String(String::from("127.0.0.1:8125")),
        )]);
        Config {
            base_path: String::from("spoon"),
            sink: SinkConfig {
                kind: String::from("statsd"),
                settings: statsd_settings,
            },
            agents: vec![
                AgentConfig {
                    enabled: true,
                    kind: String::from("time"),
                    interval: 10.0,
                    path: String::from(".time"),
                    settings: toml::Table::new(),
                },
                AgentConfig {
                    enabled: true,
                    kind: String::from("cpu"),
                    interval: 30.0,
                    path: String::from(".cpu"),
                    settings: toml::Table::new(),
                },
            ],
        }
    }
}

impl AgentConfig {
    /// The tick period of this agent.
    ///
    /// Call [`Config::clean_and_validate`] first: the conversion requires a positive, finite value.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }
}

/// Deserializes an open settings table into the typed settings of a concrete agent or sink.
pub fn deserialize_settings<T: DeserializeOwned>(settings: &toml::Table) -> Result<T, toml::de::Error> {
    toml::Value::Table(settings.clone()).try_into()
}
