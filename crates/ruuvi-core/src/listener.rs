//! Advertisement intake: filter, decode, and stream samples.
//!
//! The [`SampleListener`] sits between an [`AdvertisementSource`] (anything
//! that yields raw manufacturer payloads, typically a BLE scanner) and the
//! rest of the pipeline. It applies the format policy, decodes payloads,
//! optionally drops samples from unregistered devices, and exposes the
//! survivors as an async [`SampleStream`].
//!
//! The stream supports graceful shutdown via a [`CancellationToken`]; the
//! background task stops cleanly and flips the listening flag back to false.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::Stream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ruuvi_types::{DataFormat, DecodedSample, RawPayload};

use crate::decoder;
use crate::error::Result;
use crate::metrics::ListenerMetrics;
use crate::registry::DeviceResolver;

/// Anything that can produce raw sensor advertisements.
///
/// Implementations hand back a channel receiver; the producer side should
/// stop when the cancellation token fires.
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Start producing advertisements until the token is cancelled.
    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<RawPayload>>;
}

/// Format and device filtering policy for the listener.
///
/// Both format switches are explicit: hosting code must decide whether
/// legacy-coexistence payloads and extended payloads are expected in its
/// deployment, so there is no `Default` impl.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Accept Data Format 6 payloads.
    ///
    /// Ignored when `enable_extended_formats` is set: a deployment that
    /// expects extended advertisements treats format 6 as a truncated
    /// duplicate and drops it.
    pub enable_data_format_6: bool,
    /// Accept Extended V1 payloads.
    pub enable_extended_formats: bool,
    /// Drop samples whose device is not in the resolver.
    ///
    /// Has no effect unless a resolver is attached. Default: false.
    pub known_devices_only: bool,
    /// Buffer size for the sample channel. Default: 64 samples.
    pub buffer_size: usize,
}

impl ListenerOptions {
    /// Create options with the two required format switches.
    #[must_use]
    pub fn new(enable_data_format_6: bool, enable_extended_formats: bool) -> Self {
        Self {
            enable_data_format_6,
            enable_extended_formats,
            known_devices_only: false,
            buffer_size: 64,
        }
    }

    /// Set whether samples from unregistered devices are dropped.
    #[must_use]
    pub fn known_devices_only(mut self, enabled: bool) -> Self {
        self.known_devices_only = enabled;
        self
    }

    /// Set the sample channel buffer size.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    fn accepts(&self, format: DataFormat) -> bool {
        match format {
            DataFormat::RawV2 => true,
            DataFormat::DataFormat6 => self.enable_data_format_6 && !self.enable_extended_formats,
            DataFormat::ExtendedV1 => self.enable_extended_formats,
        }
    }
}

/// Filters and decodes raw advertisements into sample streams.
pub struct SampleListener {
    options: ListenerOptions,
    resolver: Option<Arc<dyn DeviceResolver>>,
    metrics: Arc<ListenerMetrics>,
    listening_tx: watch::Sender<bool>,
    listening_rx: watch::Receiver<bool>,
}

impl SampleListener {
    /// Create a listener with the given filtering policy.
    #[must_use]
    pub fn new(options: ListenerOptions) -> Self {
        let (listening_tx, listening_rx) = watch::channel(false);
        Self {
            options,
            resolver: None,
            metrics: Arc::new(ListenerMetrics::new()),
            listening_tx,
            listening_rx,
        }
    }

    /// Attach a device resolver used by the `known_devices_only` filter.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn DeviceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The listener's throughput counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<ListenerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Whether the listener currently has an active stream consuming a source.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        *self.listening_rx.borrow()
    }

    /// Wait until the background task has started consuming the source, or
    /// the token fires.
    ///
    /// Useful in tests and startup sequencing to avoid racing the first
    /// advertisement against stream setup.
    pub async fn wait_until_listening(&self, cancel: CancellationToken) {
        let mut rx = self.listening_rx.clone();
        // Not listening yet; wait for the flag to flip.
        while !*rx.borrow_and_update() {
            tokio::select! {
                () = cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Subscribe to the source and stream decoded samples until cancelled.
    ///
    /// Advertisements that fail any filter are counted and dropped, never
    /// surfaced as stream errors; a payload that cannot be decoded only
    /// means "not one of ours".
    pub async fn listen(
        &self,
        source: &dyn AdvertisementSource,
        cancel: CancellationToken,
    ) -> Result<SampleStream> {
        let mut payloads = source.subscribe(cancel.clone()).await?;
        let (tx, rx) = mpsc::channel(self.options.buffer_size);

        let options = self.options.clone();
        let resolver = self.resolver.clone();
        let metrics = Arc::clone(&self.metrics);
        let listening_tx = self.listening_tx.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            listening_tx.send_replace(true);
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!("listener cancelled, stopping");
                        break;
                    }
                    payload = payloads.recv() => {
                        let Some(payload) = payload else {
                            debug!("advertisement source closed, stopping");
                            break;
                        };
                        if let Some(sample) = process(&payload, &options, resolver.as_deref(), &metrics)
                            && tx.send(sample).await.is_err()
                        {
                            debug!("sample receiver dropped, stopping");
                            break;
                        }
                    }
                }
            }
            listening_tx.send_replace(false);
        });

        Ok(SampleStream {
            receiver: rx,
            handle,
            cancel_token: cancel,
        })
    }
}

fn process(
    payload: &RawPayload,
    options: &ListenerOptions,
    resolver: Option<&dyn DeviceResolver>,
    metrics: &ListenerMetrics,
) -> Option<DecodedSample> {
    metrics.record_received();

    let format = payload
        .data
        .first()
        .and_then(|&b| DataFormat::try_from(b).ok());
    let Some(format) = format else {
        trace!(len = payload.data.len(), "unrecognized payload, skipping");
        metrics.record_skipped_decode();
        return None;
    };
    if !options.accepts(format) {
        trace!(%format, "payload excluded by format policy, skipping");
        metrics.record_skipped_format();
        return None;
    }

    let sample = match decoder::decode(payload) {
        Ok(sample) => sample,
        Err(err) => {
            trace!(%format, error = %err, "payload failed to decode, skipping");
            metrics.record_skipped_decode();
            return None;
        }
    };

    if options.known_devices_only
        && let Some(resolver) = resolver
    {
        let known = sample
            .mac_address
            .as_deref()
            .is_some_and(|mac| resolver.lookup(mac).is_some());
        if !known {
            trace!(mac = ?sample.mac_address, "device not registered, skipping");
            metrics.record_skipped_unknown_device();
            return None;
        }
    }

    if let Some(mac) = sample.mac_address.as_deref() {
        metrics.record_accepted(mac);
    } else {
        metrics.record_accepted("");
    }
    Some(sample)
}

/// A stream of decoded samples from a listener.
///
/// Supports graceful shutdown via [`close`](Self::close); dropping the
/// stream cancels the background task as well.
pub struct SampleStream {
    receiver: mpsc::Receiver<DecodedSample>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl SampleStream {
    /// Close the stream and stop the background task gracefully.
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    /// A token that cancels this stream when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether the background task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for SampleStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for SampleStream {
    type Item = DecodedSample;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}
