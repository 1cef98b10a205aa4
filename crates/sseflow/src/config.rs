//! Event source configuration.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::error::{EventSourceError, EventSourceResult};
use crate::retry::{Backoff, DEFAULT_RETRY_INTERVAL, RetryPolicy};
use sseflow_transport_traits::DEFAULT_REQUEST_TIMEOUT;

/// Configuration for one event source subscription.
///
/// Durations serialize as integer milliseconds, and every field except `url`
/// may be omitted:
///
/// ```rust
/// use sseflow::EventSourceConfig;
///
/// let config: EventSourceConfig = serde_json::from_str(
///     r#"{"url": "https://example.com/events", "max_retry_count": 5, "timeout": 30000}"#,
/// ).unwrap();
/// assert_eq!(config.method, "GET");
/// ```
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSourceConfig {
    /// SSE endpoint URL.
    pub url: String,

    /// HTTP method.
    pub method: String,

    /// Request headers sent with every attempt.
    pub headers: HashMap<String, String>,

    /// Already-serialized request body.
    #[serde(skip)]
    pub body: Option<Bytes>,

    /// Keep the session ended after a clean close instead of reconnecting.
    pub open_when_hidden: bool,

    /// Retries allowed since the last successful open (None = unlimited).
    pub max_retry_count: Option<u32>,

    /// Request-level timeout handed to the transport.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,

    /// Delay before reconnecting after a clean close.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,

    /// Growth applied to retry delays.
    pub backoff: Backoff,

    /// Use the server's `retry:` hint as the clean-close reconnect interval.
    pub honor_server_retry: bool,

    /// Longest accepted line in bytes (None = unlimited).
    pub max_line_length: Option<usize>,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            open_when_hidden: false,
            max_retry_count: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            backoff: Backoff::Fixed,
            honor_server_retry: false,
            max_line_length: None,
        }
    }
}

impl EventSourceConfig {
    /// Create a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the HTTP method (e.g., `POST` for POST-based streams).
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Add a request header, replacing any existing header of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON request body.
    ///
    /// Adds `content-type: application/json` unless a content type is set.
    pub fn json_body<T: Serialize + ?Sized>(mut self, value: &T) -> EventSourceResult<Self> {
        let body = serde_json::to_vec(value)?;
        if !self
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"))
        {
            self.headers
                .insert("content-type".to_string(), "application/json".to_string());
        }
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// Set whether a clean close ends the session instead of reconnecting.
    #[must_use]
    pub fn open_when_hidden(mut self, enabled: bool) -> Self {
        self.open_when_hidden = enabled;
        self
    }

    /// Set the maximum retry count.
    #[must_use]
    pub fn max_retry_count(mut self, count: Option<u32>) -> Self {
        self.max_retry_count = count;
        self
    }

    /// Set the request-level timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the clean-close reconnect interval.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the retry backoff.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set whether the server's `retry:` hint overrides the retry interval.
    #[must_use]
    pub fn honor_server_retry(mut self, enabled: bool) -> Self {
        self.honor_server_retry = enabled;
        self
    }

    /// Set the maximum line length.
    #[must_use]
    pub fn max_line_length(mut self, limit: Option<usize>) -> Self {
        self.max_line_length = limit;
        self
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry_count: self.max_retry_count,
            retry_interval: self.retry_interval,
            backoff: self.backoff.clone(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::Configuration`] if the URL is not an
    /// absolute http(s) URL, the method is empty, or the timeout is zero.
    pub fn validate(&self) -> EventSourceResult<()> {
        if self.url.is_empty() {
            return Err(EventSourceError::Configuration(
                "URL cannot be empty".to_string(),
            ));
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| EventSourceError::Configuration(format!("Invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EventSourceError::Configuration(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }
        if self.method.trim().is_empty() {
            return Err(EventSourceError::Configuration(
                "Method cannot be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(EventSourceError::Configuration(
                "Timeout must be > 0".to_string(),
            ));
        }
        if self.max_line_length == Some(0) {
            return Err(EventSourceError::Configuration(
                "Max line length must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
