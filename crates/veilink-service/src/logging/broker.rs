// ============================================
// File: crates/veilink-service/src/logging/broker.rs
// ============================================
//! # Log Broker
//!
//! ## Creation Reason
//! Implements the command server's log distribution: a bounded FIFO
//! history that doubles as a broadcast source for LOG subscribers.
//!
//! ## Main Functionality
//! - `LogBroker`: bounded history plus broadcast channel
//! - `LogStream`: per-subscriber handle bound to a generation counter
//!
//! ## Distribution Semantics
//! ```text
//! publish ──► history (≤ max_lines, FIFO eviction)
//!         └─► broadcast (bounded; lagged subscribers skip)
//!
//! subscribe ──► snapshot of history + live receiver
//! reset     ──► generation += 1 → every open stream ends
//! ```
//! A fresh subscriber receives exactly the last `min(N, max_lines)`
//! records in emission order, then live records. The history lock
//! orders snapshots against broadcast sends, so no record is lost or
//! duplicated across the snapshot/live boundary.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `publish` must never block the emitting caller; the broadcast
//!   channel is bounded and lagged receivers skip, they don't apply
//!   backpressure
//! - Generation handles replace the old single-subscriber reset
//!   channel; any number of streams can be open, a reset ends them all

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use veilink_common::types::LogRecord;

use crate::logging::LogSink;

/// Broadcast buffer depth per subscriber.
const BROADCAST_CAPACITY: usize = 128;

// ============================================
// LogBroker
// ============================================

/// Bounded log history with broadcast distribution.
pub struct LogBroker {
    max_lines: usize,
    history: Mutex<VecDeque<LogRecord>>,
    channel: broadcast::Sender<LogRecord>,
    generation: watch::Sender<u64>,
}

impl LogBroker {
    /// Creates a broker with the given history capacity.
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        let (channel, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            max_lines,
            history: Mutex::new(VecDeque::with_capacity(max_lines.min(1024))),
            channel,
            generation,
        }
    }

    /// Appends a record to the history and broadcasts it.
    ///
    /// Never blocks: eviction is O(1) and the broadcast send drops into
    /// per-subscriber ring buffers.
    pub fn publish(&self, record: LogRecord) {
        let mut history = self.history.lock();
        if history.len() == self.max_lines {
            history.pop_front();
        }
        history.push_back(record.clone());
        // Send while holding the lock so a concurrent subscriber either
        // sees this record in its snapshot or receives it live - never
        // both, never neither.
        let _ = self.channel.send(record);
    }

    /// Returns a copy of the current history, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    /// Returns `true` if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Opens a subscription: history snapshot plus live tail.
    #[must_use]
    pub fn subscribe(&self) -> LogStream {
        let history = self.history.lock();
        let receiver = self.channel.subscribe();
        let snapshot: VecDeque<LogRecord> = history.iter().cloned().collect();
        drop(history);
        LogStream {
            snapshot,
            receiver,
            generation: self.generation.subscribe(),
        }
    }

    /// Invalidates every open stream without touching the listener or
    /// the history.
    pub fn reset_streams(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Current stream generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

impl LogSink for LogBroker {
    fn write_record(&self, record: &LogRecord) {
        self.publish(record.clone());
    }
}

impl std::fmt::Debug for LogBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBroker")
            .field("max_lines", &self.max_lines)
            .field("len", &self.len())
            .field("generation", &self.generation())
            .finish()
    }
}

// ============================================
// LogStream
// ============================================

/// One subscriber's view: buffered history, then live records, until
/// the stream's generation is invalidated.
pub struct LogStream {
    snapshot: VecDeque<LogRecord>,
    receiver: broadcast::Receiver<LogRecord>,
    generation: watch::Receiver<u64>,
}

impl LogStream {
    /// Returns the next record.
    ///
    /// # Returns
    /// `None` once the stream was invalidated by a reset or the broker
    /// was dropped.
    pub async fn next(&mut self) -> Option<LogRecord> {
        if let Some(record) = self.snapshot.pop_front() {
            return Some(record);
        }
        loop {
            tokio::select! {
                changed = self.generation.changed() => {
                    // Reset fired, or the broker is gone.
                    let _ = changed;
                    return None;
                }
                received = self.receiver.recv() => match received {
                    Ok(record) => return Some(record),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Number of buffered history records not yet consumed.
    #[must_use]
    pub fn pending_snapshot(&self) -> usize {
        self.snapshot.len()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use veilink_common::types::Severity;

    fn record(i: usize) -> LogRecord {
        LogRecord::new(Severity::Info, format!("record {i}"))
    }

    #[test]
    fn test_history_bounded_fifo() {
        let broker = LogBroker::new(3);
        for i in 0..5 {
            broker.publish(record(i));
        }

        // Capacity never exceeded; exactly the oldest evicted.
        let snapshot = broker.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].message, "record 2");
        assert_eq!(snapshot[2].message, "record 4");
    }

    #[test]
    fn test_history_under_capacity() {
        let broker = LogBroker::new(10);
        broker.publish(record(0));
        broker.publish(record(1));
        assert_eq!(broker.len(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_gets_last_min_n_m_in_order() {
        let broker = LogBroker::new(4);
        for i in 0..9 {
            broker.publish(record(i));
        }

        let mut stream = broker.subscribe();
        for expected in 5..9 {
            let received = stream.next().await.unwrap();
            assert_eq!(received.message, format!("record {expected}"));
        }

        // Live records follow the snapshot in order.
        broker.publish(record(9));
        assert_eq!(stream.next().await.unwrap().message, "record 9");
    }

    #[tokio::test]
    async fn test_reset_ends_open_streams() {
        let broker = LogBroker::new(8);
        broker.publish(record(0));

        let mut stream = broker.subscribe();
        assert!(stream.next().await.is_some());

        broker.reset_streams();
        assert!(stream.next().await.is_none());
        assert_eq!(broker.generation(), 1);

        // A fresh subscription works after the reset.
        let mut fresh = broker.subscribe();
        assert_eq!(fresh.next().await.unwrap().message, "record 0");
    }

    #[tokio::test]
    async fn test_reset_before_first_poll_ends_stream() {
        let broker = LogBroker::new(8);
        let mut stream = broker.subscribe();
        broker.reset_streams();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_publisher() {
        let broker = LogBroker::new(16);
        let mut stream = broker.subscribe();

        // Overrun the broadcast buffer without anybody draining it.
        for i in 0..(BROADCAST_CAPACITY * 2) {
            broker.publish(record(i));
        }

        // The publisher never blocked; the lagged subscriber skips
        // ahead and still terminates on reset.
        broker.reset_streams();
        loop {
            if stream.next().await.is_none() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let broker = LogBroker::new(8);
        broker.publish(record(0));

        let mut first = broker.subscribe();
        let mut second = broker.subscribe();
        broker.publish(record(1));

        for stream in [&mut first, &mut second] {
            assert_eq!(stream.next().await.unwrap().message, "record 0");
            assert_eq!(stream.next().await.unwrap().message, "record 1");
        }
    }
}
