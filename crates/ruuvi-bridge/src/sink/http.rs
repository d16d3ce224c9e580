//! HTTP sink: POST each batch as a JSON array.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ruuvi_core::{DecodedSample, Sink, SinkError};

use crate::config::HttpConfig;

/// POSTs sample batches to a configured endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpSink {
    /// Build a sink for the configured endpoint.
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn publish(&self, samples: &[DecodedSample]) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.url).json(samples);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("endpoint returned {status}").into());
        }
        debug!(samples = samples.len(), %status, "batch delivered");
        Ok(())
    }
}
