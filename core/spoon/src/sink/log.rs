use super::Sink;

/// A sink that writes every gauge to the logs instead of sending it anywhere.
///
/// Useful to try out a configuration without a statsd daemon.
pub struct LogSink;

impl Sink for LogSink {
    fn gauge(&self, path: &str, value: f64) {
        log::info!("gauge {path} = {value}");
    }
}
