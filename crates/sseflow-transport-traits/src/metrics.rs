//! Stream metrics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of an event source's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Total number of request attempts started.
    pub connection_attempts: u64,

    /// Attempts whose response was accepted by `on_open`.
    pub connections_opened: u64,

    /// Attempts that ended in a transport failure.
    pub failed_connections: u64,

    /// Total number of body bytes received.
    pub bytes_received: u64,

    /// Total number of body chunks received.
    pub chunks_received: u64,

    /// Total number of messages delivered to `on_message`.
    pub messages_received: u64,

    /// Total number of reconnects scheduled.
    pub retries_scheduled: u64,

    /// Parse and message-handler errors reported to `on_error`.
    pub processing_errors: u64,

    /// Average time from request start to response headers, in milliseconds.
    pub average_open_latency_ms: f64,
}

/// A lock-free, atomic structure for metrics updates from the session driver.
#[derive(Debug, Default)]
pub struct AtomicStreamMetrics {
    /// Request attempts started (atomic counter).
    pub connection_attempts: AtomicU64,

    /// Attempts accepted by `on_open` (atomic counter).
    pub connections_opened: AtomicU64,

    /// Transport failures (atomic counter).
    pub failed_connections: AtomicU64,

    /// Body bytes received (atomic counter).
    pub bytes_received: AtomicU64,

    /// Body chunks received (atomic counter).
    pub chunks_received: AtomicU64,

    /// Messages delivered (atomic counter).
    pub messages_received: AtomicU64,

    /// Reconnects scheduled (atomic counter).
    pub retries_scheduled: AtomicU64,

    /// Processing errors (atomic counter).
    pub processing_errors: AtomicU64,

    /// Time-to-headers, stored as an exponential moving average in microseconds.
    avg_open_latency_us: AtomicU64,
}

impl AtomicStreamMetrics {
    /// Creates a new instance with all counters initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a received chunk of `len` bytes.
    pub fn record_chunk(&self, len: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Updates the average time-to-headers using an exponential moving average (EMA).
    pub fn update_open_latency_us(&self, latency_us: u64) {
        let current = self.avg_open_latency_us.load(Ordering::Relaxed);
        let new_avg = if current == 0 {
            latency_us
        } else {
            // EMA with alpha = 0.1, saturating so long stalls cannot overflow
            current.saturating_mul(9).saturating_add(latency_us) / 10
        };
        self.avg_open_latency_us.store(new_avg, Ordering::Relaxed);
    }

    /// Creates a serializable snapshot from the current atomic values.
    pub fn snapshot(&self) -> StreamMetrics {
        StreamMetrics {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            average_open_latency_ms: (self.avg_open_latency_us.load(Ordering::Relaxed) as f64)
                / 1000.0,
        }
    }
}
