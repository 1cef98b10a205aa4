//! # sseflow Transport Traits
//!
//! The transport collaborator contract for the sseflow event source client.
//! The core never performs network I/O itself; it drives an implementation of
//! [`Transport`] and reacts to the [`TransportSignal`]s it delivers.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Transport`], [`TransportHandle`]
//! - **Types**: [`TransportRequest`], [`ResponseMeta`], [`TransportConnection`]
//! - **Signals**: [`TransportSignal`], [`SignalEmitter`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Metrics**: [`StreamMetrics`], [`AtomicStreamMetrics`]
//!
//! ## Usage
//!
//! Transport implementations create a signal channel per attempt, spawn the
//! work that feeds it, and hand the receiver back:
//!
//! ```rust,ignore
//! use sseflow_transport_traits::{
//!     OpenFuture, Transport, TransportConnection, TransportRequest, signal_channel,
//! };
//!
//! #[derive(Debug)]
//! struct MyTransport;
//!
//! impl Transport for MyTransport {
//!     fn open(&self, request: TransportRequest) -> OpenFuture<'_> {
//!         Box::pin(async move {
//!             let (emitter, signals) = signal_channel(64);
//!             let handle = spawn_request(request, emitter);
//!             Ok(TransportConnection::new(signals, Box::new(handle)))
//!         })
//!     }
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod error;
mod metrics;
mod signal;
mod traits;
mod types;

// Re-export all public items
pub use error::{TransportError, TransportResult};
pub use metrics::{AtomicStreamMetrics, StreamMetrics};
pub use signal::{
    DEFAULT_SIGNAL_CAPACITY, SignalEmitter, SignalReceiver, TransportSignal, signal_channel,
};
pub use traits::{OpenFuture, Transport, TransportConnection, TransportHandle};
pub use types::{DEFAULT_REQUEST_TIMEOUT, EVENT_STREAM_MIME, ResponseMeta, TransportRequest};
