//! Transfer progress as a bounded-frequency channel.
//!
//! Producers call [`ProgressSink::report`] as often as they like (typically
//! once per chunk); a snapshot is only published when `min_interval` has
//! elapsed since the previous one, or when the transfer completes. Consumers
//! hold a [`ProgressStream`] and either poll [`ProgressStream::latest`] or
//! await [`ProgressStream::changed`].

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Default publish interval.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    /// Bytes per second measured over the last publish interval.
    pub rate_bps: f64,
    pub finished: bool,
}

impl TransferProgress {
    pub fn percent(&self) -> Option<f32> {
        self.total_bytes.map(|t| {
            if t == 0 {
                100.0
            } else {
                (self.bytes_transferred as f64 / t as f64 * 100.0) as f32
            }
        })
    }
}

struct EmitState {
    last_emit: Option<Instant>,
    last_bytes: u64,
}

/// Producer half.
pub struct ProgressSink {
    tx: watch::Sender<TransferProgress>,
    min_interval: Duration,
    state: Mutex<EmitState>,
}

/// Consumer half.
#[derive(Clone)]
pub struct ProgressStream {
    rx: watch::Receiver<TransferProgress>,
}

/// Create a linked sink/stream pair.
pub fn progress_channel(min_interval: Duration) -> (ProgressSink, ProgressStream) {
    let (tx, rx) = watch::channel(TransferProgress::default());
    (
        ProgressSink {
            tx,
            min_interval,
            state: Mutex::new(EmitState {
                last_emit: None,
                last_bytes: 0,
            }),
        },
        ProgressStream { rx },
    )
}

impl ProgressSink {
    /// Record the running total. Returns `true` when a snapshot was published.
    pub fn report(&self, bytes_transferred: u64, total_bytes: Option<u64>) -> bool {
        let done = total_bytes.is_some_and(|t| bytes_transferred >= t);
        self.publish(bytes_transferred, total_bytes, done)
    }

    /// Publish the final snapshot unconditionally.
    pub fn finish(&self, bytes_transferred: u64, total_bytes: Option<u64>) {
        self.publish(bytes_transferred, total_bytes, true);
    }

    fn publish(&self, bytes: u64, total: Option<u64>, force: bool) -> bool {
        let Ok(mut st) = self.state.lock() else {
            return false;
        };
        let now = Instant::now();
        let due = match st.last_emit {
            None => true,
            Some(prev) => now.duration_since(prev) >= self.min_interval,
        };
        if !due && !force {
            return false;
        }
        let rate = match st.last_emit {
            Some(prev) => {
                let secs = now.duration_since(prev).as_secs_f64().max(0.001);
                bytes.saturating_sub(st.last_bytes) as f64 / secs
            }
            None => 0.0,
        };
        st.last_emit = Some(now);
        st.last_bytes = bytes;
        self.tx.send_replace(TransferProgress {
            bytes_transferred: bytes,
            total_bytes: total,
            rate_bps: rate,
            finished: force && total.map_or(true, |t| bytes >= t),
        });
        true
    }
}

impl ProgressStream {
    pub fn latest(&self) -> TransferProgress {
        *self.rx.borrow()
    }

    /// Wait for the next published snapshot. `None` once the sink is gone.
    pub async fn changed(&mut self) -> Option<TransferProgress> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
