//! # sseflow
//!
//! A Server-Sent Events client: connection lifecycle, incremental frame
//! parsing, and automatic reconnects with backoff and `last-event-id`
//! resumption, layered over any chunked HTTP [`Transport`].
//!
//! ## Architecture
//!
//! ```text
//! Transport --bytes--> Utf8StreamDecoder --text--> FrameParser --Message--> EventSourceHandler
//!     ^                                                                           |
//!     +------------- EventSource (session state machine) <-- RetryPolicy <--------+
//! ```
//!
//! - [`Utf8StreamDecoder`] turns boundary-unaligned bytes into text
//! - [`FrameParser`] assembles SSE records across chunks
//! - [`RetryPolicy`] decides whether and when to reconnect
//! - [`EventSource`] owns the session and drives the user's [`EventSourceHandler`]
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sseflow::{Callbacks, EventSourceConfig, fetch_event_source};
//!
//! # async fn example() -> Result<(), sseflow::EventSourceError> {
//! let handle = fetch_event_source(
//!     EventSourceConfig::new("https://example.com/events").max_retry_count(Some(5)),
//!     Callbacks::new().on_message(|message| async move {
//!         println!("{}: {}", message.event_type(), message.data.trim_end());
//!         Ok(())
//!     }),
//! )?;
//!
//! tokio::signal::ctrl_c().await.ok();
//! handle.abort();
//! handle.join().await
//! # }
//! ```
//!
//! A cleanly closed stream is reconnected after `retry_interval` unless
//! `open_when_hidden` is set; only [`EventSourceHandle::abort`] stops a
//! session for good.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod handle;
pub mod handler;
pub mod parser;
pub mod retry;
pub mod session;

pub use config::EventSourceConfig;
pub use decoder::Utf8StreamDecoder;
pub use error::{EventSourceError, EventSourceResult};
pub use handle::{AbortSignal, EventSourceHandle};
pub use handler::{
    Callbacks, EventSourceHandler, HandlerError, HandlerResult, validate_event_stream,
};
pub use parser::{FrameParser, Message, ParseError};
pub use retry::{Backoff, DEFAULT_RETRY_INTERVAL, RetryDecision, RetryPolicy};
pub use session::{EventSource, LAST_EVENT_ID_HEADER, SessionSnapshot, SessionState};

// Transport contract, re-exported for implementors
pub use sseflow_transport_traits::{
    ResponseMeta, StreamMetrics, Transport, TransportError, TransportRequest, TransportSignal,
};

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use sseflow_http::{HttpTransport, HttpTransportConfig};

/// Starts a session over the default [`HttpTransport`].
///
/// # Errors
///
/// Returns [`EventSourceError::Configuration`] for an invalid configuration,
/// or [`EventSourceError::Transport`] if the HTTP client cannot be built.
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub fn fetch_event_source<H>(
    config: EventSourceConfig,
    handler: H,
) -> EventSourceResult<EventSourceHandle>
where
    H: EventSourceHandler + 'static,
{
    let transport = HttpTransport::new(HttpTransportConfig::default())?;
    Ok(EventSource::new(config, transport, handler)?.spawn())
}
