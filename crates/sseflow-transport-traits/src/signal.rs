//! Transport signals and the emitter transports use to deliver them.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TransportError;
use crate::types::ResponseMeta;

/// Default capacity of the signal channel created by [`signal_channel`].
pub const DEFAULT_SIGNAL_CAPACITY: usize = 64;

/// Receiving end of a transport's signal channel.
pub type SignalReceiver = mpsc::Receiver<TransportSignal>;

/// A signal delivered by a transport for one request attempt.
///
/// Per attempt a transport delivers `Headers` at most once and before any
/// `Chunk`, then zero or more `Chunk`s in order, then exactly one of
/// `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// Response metadata has been received.
    Headers(ResponseMeta),

    /// A raw slice of the response body.
    Chunk(Bytes),

    /// The response body ended normally.
    Completed,

    /// The attempt failed before or during delivery.
    Failed(TransportError),
}

impl TransportSignal {
    /// Returns `true` for `Completed` and `Failed`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Creates a signal channel with the given capacity.
pub fn signal_channel(capacity: usize) -> (SignalEmitter, SignalReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (SignalEmitter::new(sender), receiver)
}

/// Sending side of a signal channel that enforces the ordering contract.
///
/// Duplicate headers and any signal after a terminal one are dropped, so a
/// transport can never report both `Completed` and `Failed` for an attempt.
#[derive(Debug)]
pub struct SignalEmitter {
    sender: mpsc::Sender<TransportSignal>,
    headers_sent: bool,
    terminated: bool,
}

impl SignalEmitter {
    /// Wraps an existing sender.
    pub fn new(sender: mpsc::Sender<TransportSignal>) -> Self {
        Self {
            sender,
            headers_sent: false,
            terminated: false,
        }
    }

    /// Emits response metadata. Returns `false` if dropped or undeliverable.
    pub async fn emit_headers(&mut self, meta: ResponseMeta) -> bool {
        if self.headers_sent {
            trace!("dropping duplicate headers signal");
            return false;
        }
        self.headers_sent = true;
        self.emit(TransportSignal::Headers(meta)).await
    }

    /// Emits one body chunk. Empty chunks are skipped.
    pub async fn emit_chunk(&mut self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return !self.is_closed();
        }
        self.emit(TransportSignal::Chunk(chunk)).await
    }

    /// Emits the `Completed` terminal signal.
    pub async fn emit_completed(&mut self) -> bool {
        self.emit(TransportSignal::Completed).await
    }

    /// Emits the `Failed` terminal signal.
    pub async fn emit_failed(&mut self, error: TransportError) -> bool {
        self.emit(TransportSignal::Failed(error)).await
    }

    /// Returns `true` if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn emit(&mut self, signal: TransportSignal) -> bool {
        if self.terminated {
            trace!(?signal, "dropping signal after terminal");
            return false;
        }
        if signal.is_terminal() {
            self.terminated = true;
        }
        self.sender.send(signal).await.is_ok()
    }
}
