//! Chunked HTTP transport built on `reqwest`.
//!
//! Each [`Transport::open`] call builds one request, spawns a pump task that
//! sends it and forwards the response as [`TransportSignal`]s, and returns
//! immediately. Status codes are never judged here: any response, including
//! a 5xx, is reported as `Headers` and streamed, and the event source's
//! `on_open` callback decides whether to accept it.
//!
//! [`TransportSignal`]: sseflow_transport_traits::TransportSignal

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client as HttpClient, header};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use sseflow_transport_traits::{
    DEFAULT_SIGNAL_CAPACITY, OpenFuture, ResponseMeta, SignalEmitter, Transport,
    TransportConnection, TransportError, TransportHandle, TransportRequest, TransportResult,
    signal_channel,
};

/// HTTP transport configuration
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// User agent string (set to None to disable User-Agent header)
    ///
    /// Default: `sseflow/{version}`
    pub user_agent: Option<String>,

    /// TCP/TLS connect timeout, separate from the request-level timeout.
    pub connect_timeout: Option<Duration>,

    /// Headers sent with every request unless the request overrides them.
    pub default_headers: HashMap<String, String>,

    /// Capacity of the per-attempt signal channel.
    pub signal_capacity: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            user_agent: Some(format!("sseflow/{}", env!("CARGO_PKG_VERSION"))),
            connect_timeout: None,
            default_headers: HashMap::new(),
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }
}

/// `reqwest`-backed [`Transport`].
#[derive(Clone)]
pub struct HttpTransport {
    config: HttpTransportConfig,
    http_client: HttpClient,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("user_agent", &self.config.user_agent)
            .field("connect_timeout", &self.config.connect_timeout)
            .finish()
    }
}

impl HttpTransport {
    /// Create a new HTTP transport with its own client.
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let mut client_builder = HttpClient::builder();

        if let Some(ref user_agent) = config.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        }

        if let Some(connect_timeout) = config.connect_timeout {
            client_builder = client_builder.connect_timeout(connect_timeout);
        }

        let http_client = client_builder.build().map_err(|e| {
            TransportError::ConfigurationError(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Build the outgoing request, rejecting parameters reqwest cannot express.
    fn build_request(&self, request: &TransportRequest) -> TransportResult<reqwest::Request> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            TransportError::ConfigurationError(format!("Invalid HTTP method: {}", request.method))
        })?;

        let mut builder = self
            .http_client
            .request(method, &request.url)
            .headers(self.build_headers(request))
            .timeout(request.timeout);

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .build()
            .map_err(|e| TransportError::ConfigurationError(format!("Invalid request: {e}")))
    }

    /// Merge default and per-request headers, request headers winning.
    fn build_headers(&self, request: &TransportRequest) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();

        // Use safe header construction - skip invalid headers rather than fail the attempt
        for (key, value) in self.config.default_headers.iter().chain(&request.headers) {
            match (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                (Ok(k), Ok(v)) => {
                    headers.insert(k, v);
                }
                _ => warn!(header = %key, "Skipping invalid request header"),
            }
        }

        headers
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: TransportRequest) -> OpenFuture<'_> {
        Box::pin(async move {
            let http_request = self.build_request(&request)?;
            let (emitter, signals) = signal_channel(self.config.signal_capacity);

            debug!(url = %request.url, method = %request.method, "Opening HTTP stream");

            let task = tokio::spawn(pump_response(
                self.http_client.clone(),
                http_request,
                PumpContext {
                    operation: format!("{} {}", request.method, request.url),
                    timeout: request.timeout,
                    chunked: request.chunked_delivery,
                },
                emitter,
            ));

            Ok(TransportConnection::new(
                signals,
                Box::new(HttpRequestHandle {
                    task: task.abort_handle(),
                }),
            ))
        })
    }
}

/// Cancel handle for one in-flight HTTP attempt.
///
/// Dropping the handle cancels the attempt as well.
#[derive(Debug)]
pub struct HttpRequestHandle {
    task: AbortHandle,
}

impl TransportHandle for HttpRequestHandle {
    fn cancel(&self) -> TransportResult<()> {
        self.task.abort();
        Ok(())
    }
}

impl Drop for HttpRequestHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct PumpContext {
    operation: String,
    timeout: Duration,
    chunked: bool,
}

/// Send the request and forward everything that comes back as signals.
async fn pump_response(
    http_client: HttpClient,
    request: reqwest::Request,
    ctx: PumpContext,
    mut emitter: SignalEmitter,
) {
    let response = match http_client.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(operation = %ctx.operation, error = %e, "HTTP request failed");
            emitter.emit_failed(map_request_error(&e, &ctx)).await;
            return;
        }
    };

    let meta = response_meta(&response);
    debug!(status = meta.status, "Received response headers");
    if !emitter.emit_headers(meta).await {
        return;
    }

    if !ctx.chunked {
        match response.bytes().await {
            Ok(body) => {
                if emitter.emit_chunk(body).await {
                    emitter.emit_completed().await;
                }
            }
            Err(e) => {
                emitter.emit_failed(map_body_error(&e, &ctx)).await;
            }
        }
        return;
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk_result) = stream.next().await {
        match chunk_result {
            Ok(chunk) => {
                trace!(len = chunk.len(), "Received body chunk");
                if !emitter.emit_chunk(chunk).await {
                    // Receiver dropped: the attempt was abandoned
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading HTTP body stream");
                emitter.emit_failed(map_body_error(&e, &ctx)).await;
                return;
            }
        }
    }

    emitter.emit_completed().await;
}

fn response_meta(response: &reqwest::Response) -> ResponseMeta {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in response.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    ResponseMeta {
        status: response.status().as_u16(),
        headers,
    }
}

fn map_request_error(error: &reqwest::Error, ctx: &PumpContext) -> TransportError {
    if error.is_timeout() {
        TransportError::RequestTimeout {
            operation: ctx.operation.clone(),
            timeout: ctx.timeout,
        }
    } else if error.is_builder() {
        TransportError::ConfigurationError(error.to_string())
    } else {
        TransportError::ConnectionFailed(error.to_string())
    }
}

fn map_body_error(error: &reqwest::Error, ctx: &PumpContext) -> TransportError {
    if error.is_timeout() {
        TransportError::RequestTimeout {
            operation: ctx.operation.clone(),
            timeout: ctx.timeout,
        }
    } else {
        TransportError::ReceiveFailed(error.to_string())
    }
}
