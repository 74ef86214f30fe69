use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Destination of coalesced updates, e.g. a streaming card element.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn apply_update(&self, channel: &str, content: &str, sequence: u64) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("update rejected: {0}")]
    Rejected(String),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug)]
pub struct CoalescerConfig {
    pub flush_interval: Duration,
    /// Bound of the submit channel.
    pub capacity: usize,
    /// Sequence number of the first update sent.
    pub first_sequence: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(20),
            capacity: 10,
            first_sequence: 1,
        }
    }
}

/// Rate-limits incremental output to an [`UpdateSink`].
///
/// Only the latest submitted value per channel survives until the next tick.
/// Each flush sends every pending channel once with a strictly increasing
/// sequence number. Closing the coalescer performs one final flush.
pub struct Coalescer {
    tx: mpsc::Sender<(String, String)>,
    task: JoinHandle<()>,
    /// Last sequence handed to the sink; survives a failed flush task.
    last_sequence: Arc<AtomicU64>,
}

impl Coalescer {
    pub fn spawn(sink: Arc<dyn UpdateSink>, config: CoalescerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let last_sequence = Arc::new(AtomicU64::new(config.first_sequence.saturating_sub(1)));
        let task = tokio::spawn(flush_loop(sink, rx, config, Arc::clone(&last_sequence)));
        Self { tx, task, last_sequence }
    }

    /// Replace the pending value of `channel`. Waits while the channel is full.
    pub async fn submit(&self, channel: impl Into<String>, value: impl Into<String>) -> Result<(), SinkError> {
        self.tx
            .send((channel.into(), value.into()))
            .await
            .map_err(|_| SinkError::Unavailable("coalescer stopped".into()))
    }

    /// Stop accepting values, flush what is pending, and return the last
    /// sequence number used (`first_sequence - 1` if nothing was sent).
    /// If the flush task died, this is the last sequence it reached.
    pub async fn close(self) -> u64 {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(error = %e, "coalescer task failed");
        }
        self.last_sequence.load(Ordering::Acquire)
    }
}

async fn flush_loop(
    sink: Arc<dyn UpdateSink>,
    mut rx: mpsc::Receiver<(String, String)>,
    config: CoalescerConfig,
    last_sequence: Arc<AtomicU64>,
) {
    let mut pending: BTreeMap<String, String> = BTreeMap::new();
    let mut sequence = config.first_sequence.saturating_sub(1);

    let mut ticker = time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval() fires immediately once
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some((channel, value)) => {
                    let _ = pending.insert(channel, value);
                }
                None => break,
            },
            _ = ticker.tick() => flush(sink.as_ref(), &mut pending, &mut sequence, &last_sequence).await,
        }
    }

    flush(sink.as_ref(), &mut pending, &mut sequence, &last_sequence).await;
    debug!(last_sequence = sequence, "coalescer closed");
}

async fn flush(
    sink: &dyn UpdateSink,
    pending: &mut BTreeMap<String, String>,
    sequence: &mut u64,
    last_sequence: &AtomicU64,
) {
    for (channel, value) in std::mem::take(pending) {
        *sequence += 1;
        last_sequence.store(*sequence, Ordering::Release);
        if let Err(e) = sink.apply_update(&channel, &value, *sequence).await {
            warn!(channel = %channel, sequence = *sequence, error = %e, "update failed");
        }
    }
}
