//! Collection agents and the registry that builds them from configuration.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::AgentConfig;
use crate::sink::Sink;

#[cfg(target_os = "linux")]
pub mod cpu;
pub mod time;

/// A unit of periodic metric collection.
///
/// One instance exists per configured entry. It owns its configuration and any
/// sampling history needed to compute rates between ticks.
pub trait Agent: Send {
    /// The configuration this agent was built from.
    fn config(&self) -> &AgentConfig;

    /// Performs one sampling pass.
    ///
    /// Reads the current state of the underlying source, optionally compares it
    /// with state stored by a previous tick, publishes zero or more gauges to
    /// `sink`, and replaces the stored state with the values just observed.
    /// Fails when the underlying source cannot be read.
    ///
    /// Ticks of a single instance are never invoked concurrently with each
    /// other; the scheduler guarantees this.
    fn tick(&mut self, sink: &dyn Sink) -> anyhow::Result<()>;
}

/// Builds an agent from its configuration, or fails with a construction error.
pub type AgentConstructor = fn(AgentConfig) -> anyhow::Result<Box<dyn Agent>>;

/// Error which can occur when building an agent from a configuration entry.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown agent type '{0}'")]
    UnknownType(String),
    #[error("could not build agent '{kind}' at path '{path}'")]
    Construction {
        kind: String,
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Maps agent type identifiers to their constructors.
pub struct AgentRegistry {
    constructors: HashMap<String, AgentConstructor>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Creates a registry with every agent type built into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("time", time::build);
        #[cfg(target_os = "linux")]
        registry.register("cpu", cpu::build);
        registry
    }

    /// Registers a constructor for the given type identifier, replacing any
    /// previous registration for the same identifier.
    pub fn register(&mut self, kind: impl Into<String>, constructor: AgentConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    /// Builds an agent from a validated configuration entry.
    pub fn build(&self, config: AgentConfig) -> Result<Box<dyn Agent>, BuildError> {
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| BuildError::UnknownType(config.kind.clone()))?;
        let kind = config.kind.clone();
        let path = config.path.clone();
        constructor(config).map_err(|source| BuildError::Construction { kind, path, source })
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
