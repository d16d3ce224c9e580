//! Console sink: one JSON line per sample on stdout.

use async_trait::async_trait;

use ruuvi_core::{DecodedSample, Sink, SinkError};

/// Prints each sample as a JSON line.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    /// Create a console sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    async fn publish(&self, samples: &[DecodedSample]) -> Result<(), SinkError> {
        for sample in samples {
            println!("{}", serde_json::to_string(sample)?);
        }
        Ok(())
    }
}
