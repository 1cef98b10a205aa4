//! Callback capability set for an event source.
//!
//! Implement [`EventSourceHandler`] for a type that owns your application
//! state, or assemble a [`Callbacks`] value from closures. Every callback is
//! optional and has a default.
//!
//! | Callback     | Default          | Error handling                                |
//! |--------------|------------------|-----------------------------------------------|
//! | `on_open`    | accept           | fatal: the session is aborted                 |
//! | `on_message` | ignore           | reported to `on_error`, rest of chunk dropped |
//! | `on_close`   | no-op            | logged                                        |
//! | `on_error`   | do not retry     | treated as "do not retry"                     |
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sseflow::{EventSourceError, EventSourceHandler, HandlerResult, Message, ResponseMeta};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Printer;
//!
//! #[async_trait]
//! impl EventSourceHandler for Printer {
//!     async fn on_open(&self, response: &ResponseMeta) -> HandlerResult<()> {
//!         sseflow::validate_event_stream(response)
//!     }
//!
//!     async fn on_message(&self, message: Message) -> HandlerResult<()> {
//!         println!("{}: {}", message.event_type(), message.data.trim_end());
//!         Ok(())
//!     }
//!
//!     async fn on_error(&self, error: &EventSourceError) -> HandlerResult<Option<Duration>> {
//!         // Reconnect after transport failures, give up on anything else
//!         Ok(error.is_transport().then_some(Duration::from_secs(2)))
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::error::EventSourceError;
use crate::parser::Message;
use sseflow_transport_traits::ResponseMeta;

/// Errors returned by user callbacks
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// Generic handler error
    #[error("Handler error: {message}")]
    Generic { message: String },

    /// The response is not an event stream the handler can consume
    #[error("Unexpected response: status {status}, content-type {}", content_type.as_deref().unwrap_or("<none>"))]
    UnexpectedResponse {
        /// HTTP status code
        status: u16,
        /// `content-type` header, if present
        content_type: Option<String>,
    },

    /// External system error (e.g., UI framework, database)
    #[error("External system error: {source}")]
    External {
        #[from]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Generic`].
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }
}

/// Result type for handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Accepts only successful `text/event-stream` responses.
///
/// Meant to be called from [`EventSourceHandler::on_open`].
pub fn validate_event_stream(response: &ResponseMeta) -> HandlerResult<()> {
    if response.is_success() && response.is_event_stream() {
        return Ok(());
    }
    Err(HandlerError::UnexpectedResponse {
        status: response.status,
        content_type: response.content_type().map(str::to_string),
    })
}

/// User callbacks driven by an event source.
///
/// Callbacks are awaited one at a time, in stream order.
#[async_trait]
pub trait EventSourceHandler: Send + Sync + std::fmt::Debug {
    /// Called once per attempt when response headers arrive.
    ///
    /// Returning an error aborts the session permanently; the error is
    /// returned from [`EventSource::run`](crate::EventSource::run).
    async fn on_open(&self, _response: &ResponseMeta) -> HandlerResult<()> {
        Ok(())
    }

    /// Called for every complete message.
    ///
    /// An error is passed to [`on_error`](Self::on_error) and the remaining
    /// messages of the same body chunk are dropped. The session keeps
    /// streaming, and the last event id only advances for messages handled
    /// successfully.
    async fn on_message(&self, _message: Message) -> HandlerResult<()> {
        Ok(())
    }

    /// Called when the server ends the stream cleanly.
    async fn on_close(&self) -> HandlerResult<()> {
        Ok(())
    }

    /// Called for transport failures and processing errors.
    ///
    /// For transport failures the return value is the retry decision:
    /// `Some(delay)` reconnects after `delay`, `None` ends the session. The
    /// value is ignored for processing errors, which never trigger a retry.
    async fn on_error(&self, _error: &EventSourceError) -> HandlerResult<Option<Duration>> {
        Ok(None)
    }
}

#[async_trait]
impl<T: EventSourceHandler + ?Sized> EventSourceHandler for Arc<T> {
    async fn on_open(&self, response: &ResponseMeta) -> HandlerResult<()> {
        (**self).on_open(response).await
    }

    async fn on_message(&self, message: Message) -> HandlerResult<()> {
        (**self).on_message(message).await
    }

    async fn on_close(&self) -> HandlerResult<()> {
        (**self).on_close().await
    }

    async fn on_error(&self, error: &EventSourceError) -> HandlerResult<Option<Duration>> {
        (**self).on_error(error).await
    }
}

type OpenCallback = Box<dyn Fn(&ResponseMeta) -> BoxFuture<'static, HandlerResult<()>> + Send + Sync>;
type MessageCallback = Box<dyn Fn(Message) -> BoxFuture<'static, HandlerResult<()>> + Send + Sync>;
type CloseCallback = Box<dyn Fn() -> BoxFuture<'static, HandlerResult<()>> + Send + Sync>;
type ErrorCallback = Box<
    dyn Fn(&EventSourceError) -> BoxFuture<'static, HandlerResult<Option<Duration>>> + Send + Sync,
>;

/// [`EventSourceHandler`] assembled from closures.
///
/// Closures receive borrowed arguments synchronously and return an owned
/// future, so anything the future needs must be copied out first:
///
/// ```rust
/// use sseflow::Callbacks;
/// use std::time::Duration;
///
/// let callbacks = Callbacks::new()
///     .on_message(|message| async move {
///         println!("{}", message.data);
///         Ok(())
///     })
///     .on_error(|error| {
///         let retry = error.is_transport();
///         async move { Ok(retry.then_some(Duration::from_secs(1))) }
///     });
/// ```
#[derive(Default)]
pub struct Callbacks {
    on_open: Option<OpenCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    /// Creates an empty set; every callback falls back to its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `on_open` callback.
    #[must_use]
    pub fn on_open<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(&ResponseMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        self.on_open = Some(Box::new(
            move |response: &ResponseMeta| -> BoxFuture<'static, HandlerResult<()>> {
                Box::pin(callback(response))
            },
        ));
        self
    }

    /// Sets the `on_message` callback.
    #[must_use]
    pub fn on_message<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        self.on_message = Some(Box::new(
            move |message: Message| -> BoxFuture<'static, HandlerResult<()>> {
                Box::pin(callback(message))
            },
        ));
        self
    }

    /// Sets the `on_close` callback.
    #[must_use]
    pub fn on_close<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        self.on_close = Some(Box::new(
            move || -> BoxFuture<'static, HandlerResult<()>> { Box::pin(callback()) },
        ));
        self
    }

    /// Sets the `on_error` callback.
    #[must_use]
    pub fn on_error<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(&EventSourceError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Option<Duration>>> + Send + 'static,
    {
        self.on_error = Some(Box::new(
            move |error: &EventSourceError| -> BoxFuture<'static, HandlerResult<Option<Duration>>> {
                Box::pin(callback(error))
            },
        ));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[async_trait]
impl EventSourceHandler for Callbacks {
    async fn on_open(&self, response: &ResponseMeta) -> HandlerResult<()> {
        match &self.on_open {
            Some(callback) => callback(response).await,
            None => Ok(()),
        }
    }

    async fn on_message(&self, message: Message) -> HandlerResult<()> {
        match &self.on_message {
            Some(callback) => callback(message).await,
            None => Ok(()),
        }
    }

    async fn on_close(&self) -> HandlerResult<()> {
        match &self.on_close {
            Some(callback) => callback().await,
            None => Ok(()),
        }
    }

    async fn on_error(&self, error: &EventSourceError) -> HandlerResult<Option<Duration>> {
        match &self.on_error {
            Some(callback) => callback(error).await,
            None => Ok(None),
        }
    }
}
