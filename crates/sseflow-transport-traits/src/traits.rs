//! Core transport traits.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::TransportResult;
use crate::signal::{SignalReceiver, TransportSignal};
use crate::types::TransportRequest;

/// Boxed future returned by [`Transport::open`].
pub type OpenFuture<'a> =
    Pin<Box<dyn Future<Output = TransportResult<TransportConnection>> + Send + 'a>>;

/// A streaming HTTP client the event source core is driven by.
///
/// `open` dispatches one request attempt and returns immediately with a
/// [`TransportConnection`]; everything the server sends back arrives as
/// [`TransportSignal`]s on that connection. An `Err` from `open` means the
/// attempt could not be started at all.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Starts one request attempt.
    fn open(&self, request: TransportRequest) -> OpenFuture<'_>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn open(&self, request: TransportRequest) -> OpenFuture<'_> {
        (**self).open(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&self, request: TransportRequest) -> OpenFuture<'_> {
        (**self).open(request)
    }
}

/// Cancellation handle for an in-flight request attempt.
pub trait TransportHandle: Send + Sync + fmt::Debug {
    /// Cancels the request. Best-effort; after this no further signals are required.
    fn cancel(&self) -> TransportResult<()>;
}

/// One in-flight request attempt: its ordered signals plus a cancel handle.
pub struct TransportConnection {
    signals: SignalReceiver,
    handle: Box<dyn TransportHandle>,
}

impl TransportConnection {
    /// Bundles a signal receiver with its cancel handle.
    pub fn new(signals: SignalReceiver, handle: Box<dyn TransportHandle>) -> Self {
        Self { signals, handle }
    }

    /// Waits for the next signal. `None` means the transport went away.
    pub async fn next_signal(&mut self) -> Option<TransportSignal> {
        self.signals.recv().await
    }

    /// Cancels the request attempt.
    pub fn cancel(&self) -> TransportResult<()> {
        self.handle.cancel()
    }
}

impl fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnection")
            .field("handle", &self.handle)
            .field("pending_signals", &self.signals.len())
            .finish()
    }
}
