//! Session state machine.
//!
//! An [`EventSource`] owns one subscription. Its driver loop opens an attempt
//! through the [`Transport`], pushes body chunks through the decoder and the
//! frame parser into the handler, and consults the [`RetryPolicy`] whenever an
//! attempt ends:
//!
//! ```text
//! Idle -> Connecting -> Open -> Closing --> Retrying -> Connecting -> ...
//!              |          |        |
//!              +----------+--> Errored --> Retrying | Terminated
//!
//! abort / fatal on_open --> Aborted
//! ```
//!
//! At most one attempt is in flight and at most one retry is pending, and the
//! two never overlap.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::EventSourceConfig;
use crate::decoder::Utf8StreamDecoder;
use crate::error::{EventSourceError, EventSourceResult};
use crate::handle::{AbortSignal, EventSourceHandle};
use crate::handler::EventSourceHandler;
use crate::parser::{FrameParser, Message};
use crate::retry::{RetryDecision, RetryPolicy};
use sseflow_transport_traits::{
    AtomicStreamMetrics, EVENT_STREAM_MIME, ResponseMeta, StreamMetrics, Transport,
    TransportConnection, TransportError, TransportRequest, TransportSignal,
};

/// Header carrying the last received event id on reconnect.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet connecting
    #[default]
    Idle,
    /// Waiting for response headers
    Connecting,
    /// Response accepted, streaming messages
    Open,
    /// Server ended the stream cleanly
    Closing,
    /// The attempt failed
    Errored,
    /// Waiting for the retry delay
    Retrying,
    /// Stopped: retry declined, budget spent, or clean close without reconnect
    Terminated,
    /// Stopped by abort or by a fatal `on_open` error
    Aborted,
}

impl SessionState {
    /// Whether the session can never leave this state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Aborted)
    }

    /// Lowercase name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Errored => "errored",
            Self::Retrying => "retrying",
            Self::Terminated => "terminated",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable part of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: SessionState,
    /// Retries scheduled since the last successful open or clean close
    pub retry_count: u32,
    /// Last non-empty event id delivered, empty until the first one
    pub last_event_id: String,
}

/// Owned state of one subscription; every transition goes through it.
#[derive(Debug)]
struct Session {
    url: String,
    method: String,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
    timeout: Duration,
    open_when_hidden: bool,
    honor_server_retry: bool,

    state: SessionState,
    retry_count: u32,
    last_event_id: String,
    server_retry: Option<Duration>,
    pending_retry: Option<Instant>,

    decoder: Utf8StreamDecoder,
    parser: FrameParser,
}

impl Session {
    fn new(config: &EventSourceConfig) -> Self {
        let parser = match config.max_line_length {
            Some(limit) => FrameParser::with_max_line_length(limit),
            None => FrameParser::new(),
        };

        Self {
            url: config.url.clone(),
            method: config.method.clone(),
            headers: config.headers.clone(),
            body: config.body.clone(),
            timeout: config.timeout,
            open_when_hidden: config.open_when_hidden,
            honor_server_retry: config.honor_server_retry,
            state: SessionState::Idle,
            retry_count: 0,
            last_event_id: String::new(),
            server_retry: None,
            pending_retry: None,
            decoder: Utf8StreamDecoder::new(),
            parser,
        }
    }

    /// Request template plus the per-attempt headers.
    fn build_request(&self) -> TransportRequest {
        let mut headers = self.headers.clone();

        if !headers.keys().any(|k| k.eq_ignore_ascii_case("accept")) {
            headers.insert("accept".to_string(), EVENT_STREAM_MIME.to_string());
        }

        if !self.last_event_id.is_empty() {
            headers.retain(|k, _| !k.eq_ignore_ascii_case(LAST_EVENT_ID_HEADER));
            headers.insert(
                LAST_EVENT_ID_HEADER.to_string(),
                self.last_event_id.clone(),
            );
        }

        TransportRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            headers,
            body: self.body.clone(),
            timeout: self.timeout,
            chunked_delivery: true,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            retry_count: self.retry_count,
            last_event_id: self.last_event_id.clone(),
        }
    }

    fn clear_stream_state(&mut self) {
        self.decoder.reset();
        self.parser.reset();
    }
}

/// How one attempt ended.
enum AttemptOutcome {
    /// The server completed the response body
    Closed,
    /// The transport failed before or during delivery
    Failed(EventSourceError),
    /// `on_open` rejected the response
    Fatal(EventSourceError),
    Aborted,
}

/// One subscription to an SSE endpoint.
///
/// ```rust,no_run
/// use sseflow::{Callbacks, EventSource, EventSourceConfig, HttpTransport, HttpTransportConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = HttpTransport::new(HttpTransportConfig::default())?;
/// let handler = Callbacks::new().on_message(|message| async move {
///     println!("{}", message.data);
///     Ok(())
/// });
///
/// let handle = EventSource::new(
///     EventSourceConfig::new("https://example.com/events"),
///     transport,
///     handler,
/// )?
/// .spawn();
///
/// // ...
/// handle.abort();
/// handle.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct EventSource {
    session: Session,
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn EventSourceHandler>,
    abort: AbortSignal,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    metrics: Arc<AtomicStreamMetrics>,
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.session.url)
            .field("state", &self.session.state)
            .field("policy", &self.policy)
            .field("transport", &self.transport)
            .field("handler", &self.handler)
            .finish()
    }
}

impl EventSource {
    /// Creates a session in the `Idle` state.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::Configuration`] if `config` is invalid.
    pub fn new<T, H>(config: EventSourceConfig, transport: T, handler: H) -> EventSourceResult<Self>
    where
        T: Transport + 'static,
        H: EventSourceHandler + 'static,
    {
        config.validate()?;

        let session = Session::new(&config);
        let (snapshot_tx, _) = watch::channel(session.snapshot());

        Ok(Self {
            session,
            policy: config.retry_policy(),
            transport: Arc::new(transport),
            handler: Arc::new(handler),
            abort: AbortSignal::new(),
            snapshot_tx,
            metrics: Arc::new(AtomicStreamMetrics::new()),
        })
    }

    /// Ties the session to an existing abort signal, e.g. one shared by
    /// several sessions.
    ///
    /// Aborting `signal` aborts this session. Aborting the session itself,
    /// or a fatal `on_open`, leaves `signal` and its other sessions running.
    #[must_use]
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = signal.child();
        self
    }

    /// Signal that aborts this session only.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Counters collected so far.
    pub fn metrics(&self) -> StreamMetrics {
        self.metrics.snapshot()
    }

    /// Runs the session on its own task.
    pub fn spawn(self) -> EventSourceHandle {
        let abort = self.abort.clone();
        let snapshot = self.snapshot_tx.subscribe();
        let metrics = Arc::clone(&self.metrics);
        let task = tokio::spawn(self.run());

        EventSourceHandle {
            abort,
            snapshot,
            metrics,
            task,
        }
    }

    /// Drives the session on the current task until it ends.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::Open`] if `on_open` rejected a response.
    /// Every other failure is delivered to `on_error` instead.
    pub async fn run(mut self) -> EventSourceResult<()> {
        info!(url = %self.session.url, "Starting event source");
        let result = self.drive().await;
        self.session.clear_stream_state();
        result
    }

    async fn drive(&mut self) -> EventSourceResult<()> {
        loop {
            if self.is_aborted() {
                self.finish(SessionState::Aborted);
                return Ok(());
            }

            let requested = match self.attempt().await {
                AttemptOutcome::Closed => self.handle_close().await,
                AttemptOutcome::Failed(err) => self.handle_failure(err).await,
                AttemptOutcome::Fatal(err) => {
                    error!(url = %self.session.url, error = %err, "Aborting event source");
                    self.abort.abort();
                    self.finish(SessionState::Aborted);
                    return Err(err);
                }
                AttemptOutcome::Aborted => {
                    info!(url = %self.session.url, "Event source aborted");
                    self.finish(SessionState::Aborted);
                    return Ok(());
                }
            };

            let Some(requested) = requested else {
                return Ok(());
            };
            if !self.schedule_retry(requested).await {
                return Ok(());
            }
        }
    }

    async fn attempt(&mut self) -> AttemptOutcome {
        self.set_state(SessionState::Connecting);
        self.session.clear_stream_state();

        let request = self.session.build_request();
        AtomicStreamMetrics::incr(&self.metrics.connection_attempts);
        info!(
            url = %request.url,
            attempt = self.session.retry_count,
            last_event_id = %self.session.last_event_id,
            "Connecting"
        );

        let started = Instant::now();
        let token = self.abort.token().clone();
        let opened = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.transport.open(request) => Some(result),
        };
        let mut connection = match opened {
            None => return AttemptOutcome::Aborted,
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                debug!(error = %e, "Transport could not start the attempt");
                return AttemptOutcome::Failed(EventSourceError::Transport(e));
            }
        };

        let mut is_open = false;
        loop {
            let signal = tokio::select! {
                biased;
                () = token.cancelled() => None,
                signal = connection.next_signal() => Some(signal),
            };
            let Some(signal) = signal else {
                cancel_quietly(&connection);
                return AttemptOutcome::Aborted;
            };
            let signal = signal.unwrap_or_else(|| {
                TransportSignal::Failed(TransportError::ConnectionLost(
                    "transport closed without a terminal signal".to_string(),
                ))
            });

            match signal {
                TransportSignal::Headers(meta) => {
                    if is_open {
                        debug!("Ignoring repeated response headers");
                        continue;
                    }
                    if self.is_aborted() {
                        cancel_quietly(&connection);
                        return AttemptOutcome::Aborted;
                    }
                    self.metrics
                        .update_open_latency_us(started.elapsed().as_micros() as u64);

                    if let Err(err) = self.accept_response(&meta).await {
                        cancel_quietly(&connection);
                        return AttemptOutcome::Fatal(err);
                    }
                    is_open = true;
                }
                TransportSignal::Chunk(bytes) => {
                    if !is_open {
                        warn!(len = bytes.len(), "Received body chunk before response headers");
                    }
                    self.process_chunk(&bytes).await;
                }
                TransportSignal::Completed => {
                    let dropped = self.session.decoder.finish();
                    let unterminated = self.session.parser.carry_len();
                    if dropped > 0 || unterminated > 0 {
                        debug!(dropped, unterminated, "Discarding unterminated input at end of stream");
                    }
                    return AttemptOutcome::Closed;
                }
                TransportSignal::Failed(e) => {
                    return AttemptOutcome::Failed(EventSourceError::Transport(e));
                }
            }
        }
    }

    async fn accept_response(&mut self, meta: &ResponseMeta) -> EventSourceResult<()> {
        debug!(status = meta.status, "Response headers received");
        self.handler
            .on_open(meta)
            .await
            .map_err(EventSourceError::Open)?;

        self.session.retry_count = 0;
        self.set_state(SessionState::Open);
        AtomicStreamMetrics::incr(&self.metrics.connections_opened);
        info!(url = %self.session.url, status = meta.status, "Event stream open");
        Ok(())
    }

    async fn process_chunk(&mut self, bytes: &[u8]) {
        self.metrics.record_chunk(bytes.len());

        let text = self.session.decoder.decode(bytes);
        if text.is_empty() {
            return;
        }

        let mut messages = Vec::new();
        let parsed = self.session.parser.feed_into(&text, &mut messages);
        trace!(len = bytes.len(), messages = messages.len(), "Processed chunk");

        // A failing handler abandons the rest of the chunk
        let total = messages.len();
        for (delivered, message) in messages.into_iter().enumerate() {
            if self.is_aborted() {
                return;
            }
            if let Err(err) = self.dispatch(message).await {
                debug!(skipped = total - delivered - 1, "Dropping rest of chunk");
                self.report_processing_error(err).await;
                return;
            }
        }

        if let Err(e) = parsed {
            self.report_processing_error(e.into()).await;
        }
    }

    async fn dispatch(&mut self, message: Message) -> EventSourceResult<()> {
        let id = message.id.clone();
        let retry = message.retry;
        AtomicStreamMetrics::incr(&self.metrics.messages_received);

        self.handler
            .on_message(message)
            .await
            .map_err(EventSourceError::Message)?;

        if let Some(id) = id
            && !id.is_empty()
        {
            self.session.last_event_id = id;
            self.publish();
        }
        if self.session.honor_server_retry && retry.is_some() {
            self.session.server_retry = retry;
        }
        Ok(())
    }

    /// Reports an error that does not end the attempt; `on_error`'s answer is ignored.
    async fn report_processing_error(&mut self, err: EventSourceError) {
        AtomicStreamMetrics::incr(&self.metrics.processing_errors);
        warn!(error = %err, "Error while processing event stream");
        if self.is_aborted() {
            return;
        }

        match self.handler.on_error(&err).await {
            Ok(Some(_)) => debug!("Ignoring retry delay returned for a processing error"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "on_error callback failed"),
        }
    }

    /// Clean end of stream. Returns the reconnect delay, or `None` when the session ends.
    async fn handle_close(&mut self) -> Option<Duration> {
        self.session.retry_count = 0;
        self.set_state(SessionState::Closing);
        info!(url = %self.session.url, "Event stream closed by server");

        if self.is_aborted() {
            self.finish(SessionState::Aborted);
            return None;
        }
        if let Err(e) = self.handler.on_close().await {
            warn!(error = %e, "on_close callback failed");
        }

        if self.session.open_when_hidden {
            info!(url = %self.session.url, "Not reconnecting after clean close");
            self.finish(SessionState::Terminated);
            return None;
        }

        Some(
            self.session
                .server_retry
                .unwrap_or(self.policy.retry_interval),
        )
    }

    /// Failed attempt. `on_error` decides whether to reconnect.
    async fn handle_failure(&mut self, err: EventSourceError) -> Option<Duration> {
        AtomicStreamMetrics::incr(&self.metrics.failed_connections);
        self.set_state(SessionState::Errored);
        let timed_out = matches!(&err, EventSourceError::Transport(e) if e.is_timeout());
        warn!(url = %self.session.url, error = %err, timed_out, "Event stream failed");

        if self.is_aborted() {
            self.finish(SessionState::Aborted);
            return None;
        }

        let requested = match self.handler.on_error(&err).await {
            Ok(delay) => delay,
            Err(e) => {
                warn!(error = %e, "on_error callback failed; not retrying");
                None
            }
        };

        if requested.is_none() {
            info!(url = %self.session.url, "Retry declined; stopping event source");
            self.finish(SessionState::Terminated);
        }
        requested
    }

    /// Waits out a retry. Returns `false` when the session ends instead.
    async fn schedule_retry(&mut self, requested: Duration) -> bool {
        if self.is_aborted() {
            self.finish(SessionState::Aborted);
            return false;
        }

        let (delay, attempt) = match self.policy.decide(self.session.retry_count, requested) {
            RetryDecision::Retry { delay, attempt } => (delay, attempt),
            RetryDecision::Exhausted => {
                error!(
                    url = %self.session.url,
                    retries = self.session.retry_count,
                    "Retry budget exhausted; stopping event source"
                );
                self.finish(SessionState::Terminated);
                return false;
            }
        };

        // A retry that is already pending keeps its deadline
        let deadline = *self
            .session
            .pending_retry
            .get_or_insert_with(|| Instant::now() + delay);
        self.session.retry_count = attempt;
        self.set_state(SessionState::Retrying);
        AtomicStreamMetrics::incr(&self.metrics.retries_scheduled);
        warn!(
            url = %self.session.url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            last_event_id = %self.session.last_event_id,
            "Reconnecting after delay"
        );

        let token = self.abort.token().clone();
        let aborted = tokio::select! {
            biased;
            () = token.cancelled() => true,
            () = tokio::time::sleep_until(deadline) => false,
        };
        self.session.pending_retry = None;

        if aborted {
            self.finish(SessionState::Aborted);
            return false;
        }
        true
    }

    fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Enters a terminal state; an abort always wins.
    fn finish(&mut self, state: SessionState) {
        let state = if self.is_aborted() {
            SessionState::Aborted
        } else {
            state
        };
        self.set_state(state);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.session.state != state {
            debug!(from = %self.session.state, to = %state, "Session state change");
        }
        self.session.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.snapshot());
    }
}

fn cancel_quietly(connection: &TransportConnection) {
    if let Err(e) = connection.cancel() {
        debug!(error = %e, "Ignoring error while cancelling transport");
    }
}
