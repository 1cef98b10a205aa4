//! Request and response types exchanged with a transport.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// MIME type of a server-sent event stream.
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Default request-level timeout (five minutes).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(300_000);

/// One request attempt handed to [`Transport::open`](crate::Transport::open).
#[derive(Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Absolute request URL.
    pub url: String,

    /// HTTP method, e.g. `GET`.
    pub method: String,

    /// Request headers. Keys are unique.
    pub headers: HashMap<String, String>,

    /// Already-serialized request body.
    pub body: Option<Bytes>,

    /// Single request-level timeout covering the whole attempt.
    pub timeout: Duration,

    /// Deliver the body as a sequence of chunks rather than one buffer.
    pub chunked_delivery: bool,
}

impl TransportRequest {
    /// Creates a `GET` request with chunked delivery and the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            chunked_delivery: true,
        }
    }

    /// Looks up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Adds a header using a builder pattern.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .field("chunked_delivery", &self.chunked_delivery)
            .finish()
    }
}

/// Response metadata delivered once per attempt, before any chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status: u16,

    /// Response headers with lower-cased names.
    pub headers: HashMap<String, String>,
}

impl ResponseMeta {
    /// Creates response metadata with the given status and no headers.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    /// Adds a header, lower-casing its name.
    #[must_use]
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns `true` for 2xx statuses.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Looks up a header by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The `content-type` header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Returns `true` if the content type is `text/event-stream` (parameters ignored).
    pub fn is_event_stream(&self) -> bool {
        self.content_type()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM_MIME))
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
