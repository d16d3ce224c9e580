//! Decoding and publishing pipeline for RuuviTag broadcast advertisements.
//!
//! This crate turns raw BLE manufacturer payloads into decoded environmental
//! samples and drives them into a delivery sink.
//!
//! # Features
//!
//! - **Payload decoding**: RAWv2 (format 5), Data Format 6, and Extended V1
//!   payloads, including every sentinel "value unavailable" encoding
//! - **Format policy**: per-deployment switches for which wire formats are
//!   accepted
//! - **Device registry**: optional filtering to registered devices only
//! - **Batching**: per-device accumulation with all-samples or latest-only
//!   retention
//! - **Publishing**: immediate or interval-flushed delivery to any [`Sink`]
//! - **Graceful shutdown**: cancellation drains accumulated samples before
//!   returning
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ruuvi_core::{
//!     AdvertisementSource, ListenerOptions, PublishMode, Publisher, SampleListener, Sink,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     source: impl AdvertisementSource,
//! #     sink: Arc<dyn Sink>,
//! # ) -> ruuvi_core::Result<()> {
//! let listener = SampleListener::new(ListenerOptions::new(true, false));
//! let publisher = Publisher::new(sink, PublishMode::Immediate);
//!
//! let cancel = CancellationToken::new();
//! let stream = listener.listen(&source, cancel.clone()).await?;
//! publisher.run(stream, cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod decoder;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod publisher;
pub mod registry;

// Re-export the wire types so hosts depend on one crate.
pub use ruuvi_types::{
    DataFormat, DecodeError, DecodedSample, Device, MacKey, MacParseError, RawPayload, format_mac,
    parse_mac,
};

pub use batch::{BatchScheduler, RetentionPolicy};
pub use error::{Error, Result};
pub use listener::{AdvertisementSource, ListenerOptions, SampleListener, SampleStream};
pub use metrics::{ListenerMetrics, ListenerMetricsSnapshot};
pub use publisher::{PublishMode, Publisher, SampleHook, SampleTransform, Sink, SinkError};
pub use registry::{DeviceRegistry, DeviceResolver};
