//! Delivery sinks: console, MQTT, and HTTP.

mod console;
mod http;
mod mqtt;

use std::sync::Arc;

use ruuvi_core::Sink;

use crate::config::SinkConfig;

pub use console::ConsoleSink;
pub use http::HttpSink;
pub use mqtt::{MqttSink, parse_broker_url};

/// Build the sink named by the configuration.
pub async fn build(config: &SinkConfig) -> anyhow::Result<Arc<dyn Sink>> {
    match config {
        SinkConfig::Console => Ok(Arc::new(ConsoleSink::new())),
        SinkConfig::Mqtt(mqtt) => Ok(Arc::new(MqttSink::connect(mqtt)?)),
        SinkConfig::Http(http) => Ok(Arc::new(HttpSink::new(http)?)),
    }
}
