//! Per-device windowed sample accumulation.
//!
//! The [`BatchScheduler`] holds samples between flushes of the batched
//! publisher mode: an outer map keyed by device MAC (insensitive to letter
//! case and separator style) with a per-device queue whose behavior depends
//! on the configured [`RetentionPolicy`].

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use ruuvi_types::{DecodedSample, MacKey};

/// How a per-device queue retains samples between flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep every enqueued sample; a drain returns them oldest-first.
    AllSamples,
    /// Keep only the most recent sample; every enqueue overwrites.
    LatestSampleOnly,
}

#[derive(Debug)]
enum DeviceQueue {
    All(VecDeque<DecodedSample>),
    Latest(Option<DecodedSample>),
}

impl DeviceQueue {
    fn new(policy: RetentionPolicy) -> Self {
        match policy {
            RetentionPolicy::AllSamples => DeviceQueue::All(VecDeque::new()),
            RetentionPolicy::LatestSampleOnly => DeviceQueue::Latest(None),
        }
    }

    // Returns the change in total sample count.
    fn push(&mut self, sample: DecodedSample) -> usize {
        match self {
            DeviceQueue::All(queue) => {
                queue.push_back(sample);
                1
            }
            DeviceQueue::Latest(slot) => {
                let added = usize::from(slot.is_none());
                *slot = Some(sample);
                added
            }
        }
    }

    fn drain_into(&mut self, out: &mut Vec<DecodedSample>) {
        match self {
            DeviceQueue::All(queue) => out.extend(queue.drain(..)),
            DeviceQueue::Latest(slot) => out.extend(slot.take()),
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    by_device: HashMap<MacKey, DeviceQueue>,
    total: usize,
}

/// Thread-safe per-device sample accumulator.
///
/// All mutation goes through one mutex, so concurrent enqueues and drains
/// never corrupt the per-device or whole-collection state.
#[derive(Debug)]
pub struct BatchScheduler {
    policy: RetentionPolicy,
    queues: Mutex<Queues>,
}

impl BatchScheduler {
    /// Create an empty scheduler with the given retention policy.
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            queues: Mutex::new(Queues::default()),
        }
    }

    /// The retention policy applied to every device queue.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Enqueue a sample into its device's queue.
    ///
    /// Samples without a MAC address are ignored: there is no queue to put
    /// them in.
    pub fn enqueue(&self, sample: DecodedSample) {
        let Some(mac) = sample.mac_address.as_deref().filter(|m| !m.is_empty()) else {
            return;
        };
        let key = MacKey::new(mac);

        let mut queues = self.queues.lock().expect("batch lock poisoned");
        let queue = queues
            .by_device
            .entry(key)
            .or_insert_with(|| DeviceQueue::new(self.policy));
        let added = queue.push(sample);
        queues.total += added;
    }

    /// Atomically snapshot and clear every device queue.
    ///
    /// Within a single device the returned samples preserve enqueue order;
    /// across devices no ordering is guaranteed.
    #[must_use]
    pub fn drain_all(&self) -> Vec<DecodedSample> {
        let mut queues = self.queues.lock().expect("batch lock poisoned");
        let mut drained = Vec::with_capacity(queues.total);
        for queue in queues.by_device.values_mut() {
            queue.drain_into(&mut drained);
        }
        queues.by_device.clear();
        queues.total = 0;
        drained
    }

    /// Number of samples currently queued across all devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.lock().expect("batch lock poisoned").total
    }

    /// Whether no samples are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
