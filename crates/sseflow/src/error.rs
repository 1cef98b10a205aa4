//! Error types for the event source.

use thiserror::Error;

use crate::handler::HandlerError;
use crate::parser::ParseError;
use sseflow_transport_traits::TransportError;

/// Result type for event source operations
pub type EventSourceResult<T> = std::result::Result<T, EventSourceError>;

/// Errors surfaced by an event source.
///
/// Only [`EventSourceError::Open`] is ever returned from
/// [`EventSource::run`](crate::EventSource::run); every other variant is
/// delivered to [`EventSourceHandler::on_error`](crate::EventSourceHandler::on_error).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EventSourceError {
    /// The transport could not start the attempt, or failed mid-stream
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// `on_message` returned an error
    #[error("Message handler failed: {0}")]
    Message(#[source] HandlerError),

    /// The frame parser rejected part of a chunk
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// `on_open` rejected the response; the session is aborted
    #[error("Open handler rejected the response: {0}")]
    Open(#[source] HandlerError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request body serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The driver task did not finish normally
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EventSourceError {
    /// Whether this error ended the session instead of being reported.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Whether this error came from the transport.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Errors raised while processing a chunk; these never trigger a retry.
    pub const fn is_processing(&self) -> bool {
        matches!(self, Self::Message(_) | Self::Parse(_))
    }
}
