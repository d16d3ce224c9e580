//! MQTT sink.
//!
//! Each sample is published as JSON to `{prefix}/{mac}`, with colons in the
//! MAC replaced so the topic has no separators MQTT dislikes. The rumqttc
//! event loop runs in a background task and handles reconnection; connection
//! errors are logged and publishing continues once the broker is back.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ruuvi_core::{DecodedSample, Sink, SinkError};

use crate::config::MqttConfig;

/// Publishes samples to an MQTT broker.
///
/// Dropping the sink stops the background event loop.
pub struct MqttSink {
    client: AsyncClient,
    topic_prefix: String,
    qos: QoS,
    retain: bool,
    cancel: CancellationToken,
}

impl MqttSink {
    /// Connect to the broker named in the configuration.
    ///
    /// The connection is established lazily by the event loop; this returns
    /// as soon as the client is set up.
    pub fn connect(config: &MqttConfig) -> anyhow::Result<Self> {
        let (host, port, use_tls) =
            parse_broker_url(&config.broker).map_err(|e| anyhow::anyhow!(e))?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        if use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let qos = match config.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        };

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        info!(broker = %config.broker, prefix = %config.topic_prefix, "MQTT sink starting");

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!("MQTT sink dropped, stopping event loop");
                        break;
                    }
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            info!("MQTT connected: {ack:?}");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("MQTT connection error: {e}. Reconnecting...");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            client,
            topic_prefix: config.topic_prefix.clone(),
            qos,
            retain: config.retain,
            cancel,
        })
    }

    fn topic_for(&self, sample: &DecodedSample) -> String {
        let device = sample
            .mac_address
            .as_deref()
            .map_or_else(|| "unknown".to_string(), sanitize_topic_segment);
        format!("{}/{}", self.topic_prefix, device)
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Sink for MqttSink {
    async fn publish(&self, samples: &[DecodedSample]) -> Result<(), SinkError> {
        for sample in samples {
            let topic = self.topic_for(sample);
            let payload = serde_json::to_vec(sample)?;
            self.client
                .publish(&topic, self.qos, self.retain, payload)
                .await?;
            debug!(%topic, "published sample");
        }
        Ok(())
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else {
        return Err("invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p.parse::<u16>().map_err(|_| format!("invalid port: {p}"))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}

/// MQTT topics cannot contain '#' or '+' wildcards; colons and spaces are
/// replaced for tidiness.
fn sanitize_topic_segment(s: &str) -> String {
    s.replace(['#', '+', ' ', '/', ':'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        let (host, port, tls) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
        assert!(!tls);

        let (host, port, tls) = parse_broker_url("mqtts://broker.example.com").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
        assert!(tls);
    }

    #[test]
    fn test_parse_broker_url_rejects_bad_input() {
        assert!(parse_broker_url("http://localhost:1883").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
    }

    #[tokio::test]
    async fn test_drop_stops_event_loop() {
        let config = MqttConfig {
            broker: "mqtt://localhost:1883".to_string(),
            client_id: "test-bridge".to_string(),
            topic_prefix: "ruuvi".to_string(),
            qos: 1,
            retain: false,
            username: None,
            password: None,
            keep_alive: 30,
        };
        let sink = MqttSink::connect(&config).unwrap();
        let token = sink.cancel.clone();
        assert!(!token.is_cancelled());

        drop(sink);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sanitize_topic_segment() {
        assert_eq!(
            sanitize_topic_segment("CB:B8:33:4C:88:4F"),
            "CB_B8_33_4C_88_4F"
        );
        assert_eq!(sanitize_topic_segment("sensor+temp"), "sensor_temp");
        assert_eq!(sanitize_topic_segment("kitchen-tag"), "kitchen-tag");
    }
}
