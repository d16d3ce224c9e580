//! Sample publishing pipeline.
//!
//! The [`Publisher`] consumes a stream of decoded samples and delivers them
//! to a [`Sink`] either immediately (one batch per sample) or on a timer,
//! accumulating between flushes in a [`BatchScheduler`].
//!
//! Delivery is decoupled from intake: batches travel over an unbounded
//! channel to a forwarder task, so a slow sink backs up the queue instead of
//! stalling the sample stream. Sink failures are logged and the pipeline
//! keeps running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use ruuvi_types::DecodedSample;

use crate::batch::{BatchScheduler, RetentionPolicy};
use crate::error::{Error, Result};

/// Error type sinks report; the pipeline only logs it.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// A delivery target for sample batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one batch. Batches are never empty.
    async fn publish(&self, samples: &[DecodedSample]) -> std::result::Result<(), SinkError>;
}

/// When the publisher hands batches to the sink.
#[derive(Debug, Clone, Copy)]
pub enum PublishMode {
    /// Every accepted sample is delivered on its own, as a batch of one.
    Immediate,
    /// Samples accumulate per device and are flushed on an interval.
    Batched {
        /// Time between automatic flushes.
        interval: Duration,
        /// Per-device retention between flushes.
        retention: RetentionPolicy,
    },
}

/// Maps a sample before publishing; returning `None` drops it.
pub type SampleTransform = dyn Fn(DecodedSample) -> Option<DecodedSample> + Send + Sync;

/// Observes every accepted sample, before batching.
pub type SampleHook = dyn Fn(&DecodedSample) + Send + Sync;

/// Drives samples from a stream into a sink.
///
/// A publisher supports at most one concurrent [`run`](Self::run); a second
/// call while one is active fails with [`Error::AlreadyRunning`]. The
/// publisher itself is reusable once a run finishes.
pub struct Publisher {
    sink: Arc<dyn Sink>,
    mode: PublishMode,
    scheduler: Arc<BatchScheduler>,
    transform: Option<Arc<SampleTransform>>,
    on_sample: Option<Arc<SampleHook>>,
    running: AtomicBool,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
    flush_notify: Arc<Notify>,
}

impl Publisher {
    /// Create a publisher delivering to the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, mode: PublishMode) -> Self {
        let retention = match mode {
            PublishMode::Immediate => RetentionPolicy::AllSamples,
            PublishMode::Batched { retention, .. } => retention,
        };
        let (running_tx, running_rx) = watch::channel(false);
        Self {
            sink,
            mode,
            scheduler: Arc::new(BatchScheduler::new(retention)),
            transform: None,
            on_sample: None,
            running: AtomicBool::new(false),
            running_tx,
            running_rx,
            flush_notify: Arc::new(Notify::new()),
        }
    }

    /// Install a transform applied to every sample before publishing.
    ///
    /// The transform may rewrite the sample or drop it by returning `None`.
    #[must_use]
    pub fn with_transform(
        mut self,
        transform: impl Fn(DecodedSample) -> Option<DecodedSample> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Install an observer called for every sample that will be published.
    #[must_use]
    pub fn with_sample_hook(
        mut self,
        hook: impl Fn(&DecodedSample) + Send + Sync + 'static,
    ) -> Self {
        self.on_sample = Some(Arc::new(hook));
        self
    }

    /// Whether a run is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of samples waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    /// Wait until an active run has finished starting up, or the token fires.
    pub async fn wait_until_running(&self, cancel: CancellationToken) {
        let mut rx = self.running_rx.clone();
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

    /// Request an out-of-schedule flush of accumulated samples.
    ///
    /// Signals are coalesced; several calls before the flush worker wakes
    /// produce one flush. A no-op in immediate mode and between runs.
    pub fn flush(&self) {
        if matches!(self.mode, PublishMode::Batched { .. }) {
            self.flush_notify.notify_one();
        }
    }

    /// Consume the stream and publish until it ends or the token fires.
    ///
    /// Cancellation is clean shutdown: accumulated samples are drained to the
    /// sink before the call returns. Returns [`Error::AlreadyRunning`] if a
    /// run is already active.
    pub async fn run<S>(&self, mut samples: S, cancel: CancellationToken) -> Result<()>
    where
        S: Stream<Item = DecodedSample> + Unpin + Send,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }
        let _guard = RunGuard {
            running: &self.running,
            running_tx: &self.running_tx,
        };

        // Delivery queue: unbounded so a slow sink never blocks intake.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<DecodedSample>>();
        let sink = Arc::clone(&self.sink);
        let forwarder = tokio::spawn(async move {
            while let Some(batch) = out_rx.recv().await {
                trace!(samples = batch.len(), "delivering batch to sink");
                if let Err(err) = sink.publish(&batch).await {
                    error!(error = %err, samples = batch.len(), "sink publish failed");
                }
            }
        });

        let workers = CancellationToken::new();
        let mut worker_handles = Vec::new();
        if let PublishMode::Batched { interval, .. } = self.mode {
            worker_handles.push(self.spawn_timer(interval, workers.clone()));
            worker_handles.push(self.spawn_flush_worker(out_tx.clone(), workers.clone()));
        }

        self.running_tx.send_replace(true);
        debug!(mode = ?self.mode, "publisher running");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("publisher cancelled, draining");
                    break;
                }
                sample = samples.next() => {
                    let Some(sample) = sample else {
                        debug!("sample stream ended, draining");
                        break;
                    };
                    let sample = match &self.transform {
                        Some(transform) => match transform(sample) {
                            Some(sample) => sample,
                            None => continue,
                        },
                        None => sample,
                    };
                    // A sample without a MAC address has no device to file it
                    // under; skip it in every mode.
                    if sample.mac_address.as_deref().is_none_or(str::is_empty) {
                        trace!("sample has no MAC address, skipping");
                        continue;
                    }
                    if let Some(hook) = &self.on_sample {
                        hook(&sample);
                    }
                    match self.mode {
                        PublishMode::Immediate => {
                            if out_tx.send(vec![sample]).is_err() {
                                break;
                            }
                        }
                        PublishMode::Batched { .. } => self.scheduler.enqueue(sample),
                    }
                }
            }
        }

        workers.cancel();
        for handle in worker_handles {
            let _ = handle.await;
        }

        // Final drain so cancellation loses nothing already accepted.
        let remaining = self.scheduler.drain_all();
        if !remaining.is_empty() {
            let _ = out_tx.send(remaining);
        }
        drop(out_tx);
        let _ = forwarder.await;

        Ok(())
    }

    fn spawn_timer(
        &self,
        interval: Duration,
        workers: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let notify = Arc::clone(&self.flush_notify);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the first window
            // is a full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = workers.cancelled() => break,
                    _ = ticker.tick() => notify.notify_one(),
                }
            }
        })
    }

    fn spawn_flush_worker(
        &self,
        out_tx: mpsc::UnboundedSender<Vec<DecodedSample>>,
        workers: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let notify = Arc::clone(&self.flush_notify);
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = workers.cancelled() => break,
                    () = notify.notified() => {
                        let batch = scheduler.drain_all();
                        if batch.is_empty() {
                            trace!("flush requested with nothing queued");
                            continue;
                        }
                        if out_tx.send(batch).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

struct RunGuard<'a> {
    running: &'a AtomicBool,
    running_tx: &'a watch::Sender<bool>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.running_tx.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use ruuvi_types::DataFormat;

    fn sample(mac: &str, sequence: u32) -> DecodedSample {
        let mut sample = DecodedSample::new(DataFormat::RawV2);
        sample.mac_address = Some(mac.to_string());
        sample.measurement_sequence = Some(sequence);
        sample
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<DecodedSample>>>,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<Vec<DecodedSample>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn publish(&self, samples: &[DecodedSample]) -> std::result::Result<(), SinkError> {
            self.batches.lock().unwrap().push(samples.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn publish(&self, _samples: &[DecodedSample]) -> std::result::Result<(), SinkError> {
            Err("sink unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_immediate_mode_one_batch_per_sample() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Publisher::new(Arc::clone(&sink) as Arc<dyn Sink>, PublishMode::Immediate);

        let samples = futures::stream::iter(vec![
            sample("AA:AA:AA:AA:AA:AA", 1),
            sample("AA:AA:AA:AA:AA:AA", 2),
        ]);
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1][0].measurement_sequence, Some(2));
    }

    #[tokio::test]
    async fn test_batched_mode_drains_on_stream_end() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Publisher::new(
            Arc::clone(&sink) as Arc<dyn Sink>,
            PublishMode::Batched {
                interval: Duration::from_secs(3600),
                retention: RetentionPolicy::AllSamples,
            },
        );

        let samples = futures::stream::iter(vec![
            sample("AA:AA:AA:AA:AA:AA", 1),
            sample("BB:BB:BB:BB:BB:BB", 2),
        ]);
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();

        // The interval never fired; everything arrives in the final drain.
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_latest_only_retention() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Publisher::new(
            Arc::clone(&sink) as Arc<dyn Sink>,
            PublishMode::Batched {
                interval: Duration::from_secs(3600),
                retention: RetentionPolicy::LatestSampleOnly,
            },
        );

        let samples = futures::stream::iter((0..5).map(|i| sample("AA:AA:AA:AA:AA:AA", i)));
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].measurement_sequence, Some(4));
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&sink) as Arc<dyn Sink>,
            PublishMode::Immediate,
        ));

        let cancel = CancellationToken::new();
        let first = {
            let publisher = Arc::clone(&publisher);
            let cancel = cancel.clone();
            tokio::spawn(async move { publisher.run(futures::stream::pending(), cancel).await })
        };
        publisher.wait_until_running(cancel.clone()).await;

        let second = publisher
            .run(futures::stream::iter(vec![]), CancellationToken::new())
            .await;
        assert!(matches!(second, Err(Error::AlreadyRunning)));

        cancel.cancel();
        first.await.unwrap().unwrap();
        assert!(!publisher.is_running());

        // The publisher is reusable once the first run finished.
        publisher
            .run(futures::stream::iter(vec![]), CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_running_obeys_cancellation() {
        let publisher = Publisher::new(
            Arc::new(RecordingSink::default()) as Arc<dyn Sink>,
            PublishMode::Immediate,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        // No run is active; the wait must still return once the token fires.
        tokio::time::timeout(
            Duration::from_secs(1),
            publisher.wait_until_running(cancel),
        )
        .await
        .expect("cancelled wait did not return");
    }

    #[tokio::test]
    async fn test_transform_rewrites_and_drops() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Publisher::new(Arc::clone(&sink) as Arc<dyn Sink>, PublishMode::Immediate)
            .with_transform(|mut sample| {
                if sample.measurement_sequence == Some(1) {
                    return None;
                }
                sample.mac_address = Some("00:00:00:00:00:00".to_string());
                Some(sample)
            });

        let samples = futures::stream::iter(vec![
            sample("AA:AA:AA:AA:AA:AA", 1),
            sample("AA:AA:AA:AA:AA:AA", 2),
        ]);
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0][0].mac_address.as_deref(),
            Some("00:00:00:00:00:00")
        );
    }

    #[tokio::test]
    async fn test_samples_without_mac_are_skipped() {
        let hook_calls = Arc::new(Mutex::new(0usize));
        let sink = Arc::new(RecordingSink::default());
        let publisher = {
            let hook_calls = Arc::clone(&hook_calls);
            Publisher::new(Arc::clone(&sink) as Arc<dyn Sink>, PublishMode::Immediate)
                .with_sample_hook(move |_| *hook_calls.lock().unwrap() += 1)
        };

        // A RAWv2 payload with the all-0xFF MAC sentinel decodes to a sample
        // with no address; such samples must not reach the hook or the sink.
        let mut anonymous = sample("", 1);
        anonymous.mac_address = None;
        let samples = futures::stream::iter(vec![anonymous, sample("AA:AA:AA:AA:AA:AA", 2)]);
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].measurement_sequence, Some(2));
        assert_eq!(*hook_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sample_hook_sees_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());
        let publisher = {
            let seen = Arc::clone(&seen);
            Publisher::new(Arc::clone(&sink) as Arc<dyn Sink>, PublishMode::Immediate)
                .with_sample_hook(move |sample| {
                    seen.lock().unwrap().push(sample.measurement_sequence);
                })
        };

        let samples = futures::stream::iter((0..3).map(|i| sample("AA:AA:AA:AA:AA:AA", i)));
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_run() {
        let publisher = Publisher::new(Arc::new(FailingSink), PublishMode::Immediate);
        let samples = futures::stream::iter((0..3).map(|i| sample("AA:AA:AA:AA:AA:AA", i)));
        publisher
            .run(samples, CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&sink) as Arc<dyn Sink>,
            PublishMode::Batched {
                interval: Duration::from_secs(10),
                retention: RetentionPolicy::AllSamples,
            },
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let run = {
            let publisher = Arc::clone(&publisher);
            let cancel = cancel.clone();
            tokio::spawn(async move { publisher.run(tokio_stream_from(rx), cancel).await })
        };
        publisher.wait_until_running(cancel.clone()).await;

        tx.send(sample("AA:AA:AA:AA:AA:AA", 1)).unwrap();
        tokio::task::yield_now().await;
        // Give intake a moment before the clock moves.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.pending(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        while publisher.pending() > 0 {
            tokio::task::yield_now().await;
        }

        drop(tx);
        cancel.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_flush() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&sink) as Arc<dyn Sink>,
            PublishMode::Batched {
                interval: Duration::from_secs(3600),
                retention: RetentionPolicy::AllSamples,
            },
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let run = {
            let publisher = Arc::clone(&publisher);
            let cancel = cancel.clone();
            tokio::spawn(async move { publisher.run(tokio_stream_from(rx), cancel).await })
        };
        publisher.wait_until_running(cancel.clone()).await;

        tx.send(sample("AA:AA:AA:AA:AA:AA", 1)).unwrap();
        while publisher.pending() == 0 {
            tokio::task::yield_now().await;
        }

        publisher.flush();
        while publisher.pending() > 0 {
            tokio::task::yield_now().await;
        }

        drop(tx);
        cancel.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.batches()[0][0].measurement_sequence, Some(1));
    }

    fn tokio_stream_from(
        rx: mpsc::UnboundedReceiver<DecodedSample>,
    ) -> impl Stream<Item = DecodedSample> + Unpin + Send {
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|sample| (sample, rx))
        })
        .boxed()
    }
}
