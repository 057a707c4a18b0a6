use std::net::UdpSocket;

use anyhow::Context;
use cadence::{Gauged, StatsdClient, UdpMetricSink};
use serde::{Deserialize, Serialize};

use super::Sink;

/// A sink that forwards gauges to a statsd daemon over UDP.
pub struct StatsdSink {
    client: StatsdClient,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Address of the statsd daemon, e.g. `"127.0.0.1:8125"`.
    pub address: String,
    /// Prefix prepended by the client to every metric path.
    #[serde(default)]
    pub prefix: String,
}

impl StatsdSink {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("could not bind a local UDP socket")?;
        // The agent loops must never block on the network.
        socket
            .set_nonblocking(true)
            .context("could not make the UDP socket non-blocking")?;
        let udp_sink = UdpMetricSink::from(settings.address.as_str(), socket)
            .with_context(|| format!("invalid statsd address '{}'", settings.address))?;
        let client = StatsdClient::builder(&settings.prefix, udp_sink)
            .with_error_handler(|e| log::warn!("failed to send a metric to statsd: {e}"))
            .build();
        Ok(Self { client })
    }
}

impl Sink for StatsdSink {
    fn gauge(&self, path: &str, value: f64) {
        // send() routes delivery failures to the client's error handler.
        self.client.gauge_with_tags(path, value).send();
    }
}
