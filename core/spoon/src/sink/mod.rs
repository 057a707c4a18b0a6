//! Metric sinks: the destinations that receive gauges.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{self, SinkConfig};

mod log;
mod statsd;

pub use self::log::LogSink;
pub use statsd::StatsdSink;

/// Consumes named numeric measurements.
///
/// A single sink instance is shared by every agent loop, so implementations must
/// tolerate interleaved, concurrent calls. `gauge` is fire and forget: delivery
/// failures are handled (typically logged) by the sink itself, never surfaced to
/// the caller.
pub trait Sink: Send + Sync {
    /// Publishes one measurement under the given dot-delimited path.
    fn gauge(&self, path: &str, value: f64);
}

/// Error which can occur when building a sink from its configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown sink type '{0}'")]
    UnknownType(String),
    #[error("could not build sink '{kind}'")]
    Construction {
        kind: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Builds the sink selected by the configuration.
pub fn build(config: &SinkConfig) -> Result<Arc<dyn Sink>, BuildError> {
    let construction = |source: anyhow::Error| BuildError::Construction {
        kind: config.kind.clone(),
        source,
    };
    match config.kind.as_str() {
        "statsd" => {
            let settings = config::deserialize_settings(&config.settings).map_err(|e| construction(e.into()))?;
            let sink = StatsdSink::new(settings).map_err(construction)?;
            Ok(Arc::new(sink))
        }
        "log" => Ok(Arc::new(LogSink)),
        other => Err(BuildError::UnknownType(other.to_owned())),
    }
}
