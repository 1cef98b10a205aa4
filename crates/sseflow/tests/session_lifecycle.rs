//! Session lifecycle tests against a scripted in-memory transport
//!
//! Covers:
//! - Chunk reassembly and clean-close handling (reconnect vs. open_when_hidden)
//! - last-event-id propagation across reconnects
//! - Retry budget, declined retries and failing on_error callbacks
//! - Fatal on_open, abort finality, abort during a pending retry
//! - Per-chunk handler errors and parse errors

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::Instant;

use sseflow::{
    AbortSignal, EventSource, EventSourceConfig, EventSourceError, EventSourceHandler, HandlerError,
    HandlerResult, Message, ResponseMeta, SessionState, Transport, TransportError,
    TransportRequest, TransportSignal,
};
use sseflow_transport_traits::{
    OpenFuture, TransportConnection, TransportHandle, TransportResult,
};

// ============================================================================
// Scripted transport
// ============================================================================

/// What one call to `open` does.
#[derive(Debug)]
enum Script {
    /// Deliver these signals; keep the channel open afterwards if `hold_open`
    Stream {
        signals: Vec<TransportSignal>,
        hold_open: bool,
    },
    /// Fail `open` itself
    OpenError(TransportError),
}

impl Script {
    fn stream(signals: Vec<TransportSignal>) -> Self {
        Self::Stream {
            signals,
            hold_open: false,
        }
    }

    fn held(signals: Vec<TransportSignal>) -> Self {
        Self::Stream {
            signals,
            hold_open: true,
        }
    }

    /// Headers, one chunk per string, then Completed
    fn closing(chunks: &[&str]) -> Self {
        let mut signals = vec![headers()];
        signals.extend(chunks.iter().map(|c| chunk(c)));
        signals.push(TransportSignal::Completed);
        Self::stream(signals)
    }
}

fn headers() -> TransportSignal {
    TransportSignal::Headers(
        ResponseMeta::new(200).with_header("content-type", "text/event-stream"),
    )
}

fn chunk(text: &str) -> TransportSignal {
    TransportSignal::Chunk(Bytes::copy_from_slice(text.as_bytes()))
}

#[derive(Debug, Default)]
struct TransportState {
    scripts: VecDeque<Script>,
    requests: Vec<(Instant, TransportRequest)>,
    held: Vec<mpsc::Sender<TransportSignal>>,
    cancels: usize,
}

#[derive(Debug, Clone, Default)]
struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    fn new(scripts: Vec<Script>) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().scripts = scripts.into();
        transport
    }

    fn requests(&self) -> Vec<TransportRequest> {
        let state = self.state.lock().unwrap();
        state.requests.iter().map(|(_, r)| r.clone()).collect()
    }

    fn request_times(&self) -> Vec<Instant> {
        let state = self.state.lock().unwrap();
        state.requests.iter().map(|(at, _)| *at).collect()
    }

    fn cancels(&self) -> usize {
        self.state.lock().unwrap().cancels
    }

    /// Pushes a signal into every held-open attempt; returns how many accepted it
    fn push_to_held(&self, signal: TransportSignal) -> usize {
        let state = self.state.lock().unwrap();
        state
            .held
            .iter()
            .filter(|sender| sender.try_send(signal.clone()).is_ok())
            .count()
    }

    async fn wait_for_requests(&self, count: usize) {
        while self.requests().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[derive(Debug)]
struct ScriptedHandle {
    state: Arc<Mutex<TransportState>>,
}

impl TransportHandle for ScriptedHandle {
    fn cancel(&self) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        state.cancels += 1;
        state.held.clear();
        Err(TransportError::Internal("cancel errors are swallowed".to_string()))
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, request: TransportRequest) -> OpenFuture<'_> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.requests.push((Instant::now(), request));

            // An exhausted script keeps the attempt open forever
            let script = state
                .scripts
                .pop_front()
                .unwrap_or_else(|| Script::held(Vec::new()));
            let (signals, hold_open) = match script {
                Script::OpenError(e) => return Err(e),
                Script::Stream { signals, hold_open } => (signals, hold_open),
            };

            let (tx, rx) = mpsc::channel(signals.len() + 8);
            for signal in signals {
                tx.try_send(signal).unwrap();
            }
            if hold_open {
                state.held.push(tx);
            }

            Ok(TransportConnection::new(
                rx,
                Box::new(ScriptedHandle {
                    state: Arc::clone(&self.state),
                }),
            ))
        })
    }
}

// ============================================================================
// Recording handler
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Open(u16),
    Message(Message),
    Close,
    Error(String),
}

#[derive(Debug, Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    retry_delay: Option<Duration>,
    reject_open: bool,
    reject_data: Option<&'static str>,
    fail_on_error: bool,
}

impl Recorder {
    fn retrying(delay: Duration) -> Self {
        Self {
            retry_delay: Some(delay),
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl EventSourceHandler for Recorder {
    async fn on_open(&self, response: &ResponseMeta) -> HandlerResult<()> {
        self.push(Event::Open(response.status));
        if self.reject_open {
            return Err(HandlerError::generic("unsupported stream"));
        }
        Ok(())
    }

    async fn on_message(&self, message: Message) -> HandlerResult<()> {
        let rejected = self.reject_data == Some(message.data.as_str());
        self.push(Event::Message(message));
        if rejected {
            return Err(HandlerError::generic("cannot handle message"));
        }
        Ok(())
    }

    async fn on_close(&self) -> HandlerResult<()> {
        self.push(Event::Close);
        Ok(())
    }

    async fn on_error(&self, error: &EventSourceError) -> HandlerResult<Option<Duration>> {
        self.push(Event::Error(error.to_string()));
        if self.fail_on_error {
            return Err(HandlerError::generic("on_error exploded"));
        }
        Ok(self.retry_delay)
    }
}

fn config() -> EventSourceConfig {
    EventSourceConfig::new("http://stream.test/events")
}

fn is_error(event: &Event) -> bool {
    matches!(event, Event::Error(_))
}

// ============================================================================
// Clean close
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_split_chunk_yields_one_message() {
    let transport = ScriptedTransport::new(vec![Script::closing(&["data: hel", "lo\n\n"])]);
    let handler = Arc::new(Recorder::default());

    let source = EventSource::new(
        config().open_when_hidden(true),
        transport.clone(),
        Arc::clone(&handler),
    )
    .unwrap();
    let snapshots = source.subscribe();
    source.run().await.unwrap();

    assert_eq!(
        handler.events(),
        vec![
            Event::Open(200),
            Event::Message(Message::new("hello\n")),
            Event::Close,
        ]
    );
    assert_eq!(snapshots.borrow().state, SessionState::Terminated);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_utf8_split_across_chunks() {
    let bytes = "data: héllo\n\n".as_bytes();
    let transport = ScriptedTransport::new(vec![Script::stream(vec![
        headers(),
        TransportSignal::Chunk(Bytes::copy_from_slice(&bytes[..8])),
        TransportSignal::Chunk(Bytes::copy_from_slice(&bytes[8..])),
        TransportSignal::Completed,
    ])]);
    let handler = Arc::new(Recorder::default());

    EventSource::new(
        config().open_when_hidden(true),
        transport,
        Arc::clone(&handler),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert!(
        handler
            .events()
            .contains(&Event::Message(Message::new("héllo\n")))
    );
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_reconnects_with_last_event_id() {
    let transport = ScriptedTransport::new(vec![
        Script::closing(&["id: 42\ndata: a\n\n"]),
        Script::closing(&["data: b\n\n"]),
    ]);
    let handler = Arc::new(Recorder::default());

    let handle = EventSource::new(config(), transport.clone(), Arc::clone(&handler))
        .unwrap()
        .spawn();
    transport.wait_for_requests(3).await;

    let requests = transport.requests();
    assert_eq!(requests[0].header("last-event-id"), None);
    assert_eq!(requests[0].header("accept"), Some("text/event-stream"));
    assert_eq!(requests[1].header("last-event-id"), Some("42"));
    // A message without an id leaves the last event id unchanged
    assert_eq!(requests[2].header("last-event-id"), Some("42"));

    // Default retry interval between a clean close and the reconnect
    let times = transport.request_times();
    assert!(times[1] - times[0] >= Duration::from_millis(1000));
    assert!(times[2] - times[1] >= Duration::from_millis(1000));

    // Every clean close resets the count before scheduling the reconnect
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(snapshot.last_event_id, "42");
    assert_eq!(handler.count(|e| *e == Event::Close), 2);
    assert_eq!(handler.count(is_error), 0);

    handle.abort();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_server_retry_hint_is_honored_when_enabled() {
    let transport = ScriptedTransport::new(vec![Script::closing(&["retry: 5000\ndata: x\n\n"])]);
    let handler = Arc::new(Recorder::default());

    let handle = EventSource::new(
        config().honor_server_retry(true),
        transport.clone(),
        Arc::clone(&handler),
    )
    .unwrap()
    .spawn();
    transport.wait_for_requests(2).await;

    let times = transport.request_times();
    assert!(times[1] - times[0] >= Duration::from_millis(5000));

    handle.abort();
    handle.join().await.unwrap();
}

// ============================================================================
// Failures and the retry budget
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_budget_stops_silently() {
    let scripts = (0..5)
        .map(|_| Script::OpenError(TransportError::ConnectionFailed("refused".to_string())))
        .collect();
    let transport = ScriptedTransport::new(scripts);
    let handler = Arc::new(Recorder::retrying(Duration::from_millis(500)));

    let source = EventSource::new(
        config().max_retry_count(Some(2)),
        transport.clone(),
        Arc::clone(&handler),
    )
    .unwrap();
    let snapshots = source.subscribe();
    source.run().await.unwrap();

    // Initial attempt plus two retries, then a silent stop
    assert_eq!(transport.requests().len(), 3);
    assert_eq!(handler.count(is_error), 3);
    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.state, SessionState::Terminated);
    assert_eq!(snapshot.retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_retry_count() {
    let transport = ScriptedTransport::new(vec![
        Script::OpenError(TransportError::ConnectionFailed("refused".to_string())),
        Script::stream(vec![
            headers(),
            TransportSignal::Failed(TransportError::ConnectionLost("reset".to_string())),
        ]),
        Script::OpenError(TransportError::ConnectionFailed("refused".to_string())),
    ]);
    let handler = Arc::new(Recorder::retrying(Duration::from_millis(100)));

    let handle = EventSource::new(
        config().max_retry_count(Some(1)),
        transport.clone(),
        Arc::clone(&handler),
    )
    .unwrap()
    .spawn();

    // Fails, retries, opens (count reset), fails, retries, fails: budget spent
    let result = handle.join().await;
    assert!(result.is_ok());
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_declined_retry_terminates() {
    let transport = ScriptedTransport::new(vec![Script::stream(vec![
        headers(),
        TransportSignal::Failed(TransportError::ReceiveFailed("body error".to_string())),
    ])]);
    let handler = Arc::new(Recorder::default());

    let source = EventSource::new(config(), transport.clone(), Arc::clone(&handler)).unwrap();
    let snapshots = source.subscribe();
    assert_eq!(source.metrics().connection_attempts, 0);
    source.run().await.unwrap();

    assert_eq!(transport.requests().len(), 1);
    assert_eq!(
        handler.events(),
        vec![
            Event::Open(200),
            Event::Error("Transport error: Receive failed: body error".to_string()),
        ]
    );
    assert_eq!(snapshots.borrow().state, SessionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_failing_on_error_means_no_retry() {
    let transport = ScriptedTransport::new(vec![Script::OpenError(
        TransportError::ConnectionFailed("refused".to_string()),
    )]);
    let handler = Arc::new(Recorder {
        retry_delay: Some(Duration::from_millis(10)),
        fail_on_error: true,
        ..Recorder::default()
    });

    EventSource::new(config(), transport.clone(), Arc::clone(&handler))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(transport.requests().len(), 1);
    assert_eq!(handler.count(is_error), 1);
}

#[tokio::test(start_paused = true)]
async fn test_channel_closed_without_terminal_is_connection_lost() {
    let transport = ScriptedTransport::new(vec![Script::stream(vec![headers()])]);
    let handler = Arc::new(Recorder::default());

    EventSource::new(config(), transport, Arc::clone(&handler))
        .unwrap()
        .run()
        .await
        .unwrap();

    let errors: Vec<Event> = handler.events().into_iter().filter(is_error).collect();
    assert_eq!(errors.len(), 1);
    let Event::Error(message) = &errors[0] else {
        unreachable!()
    };
    assert!(message.contains("Connection lost"), "{message}");
}

// ============================================================================
// Fatal open and abort
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fatal_on_open_aborts_and_propagates() {
    let transport = ScriptedTransport::new(vec![Script::held(vec![headers()])]);
    let handler = Arc::new(Recorder {
        reject_open: true,
        retry_delay: Some(Duration::from_millis(10)),
        ..Recorder::default()
    });

    let handle = EventSource::new(config(), transport.clone(), Arc::clone(&handler))
        .unwrap()
        .spawn();
    let signal = handle.abort_signal();
    let mut snapshots = handle.subscribe();

    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, EventSourceError::Open(_)));
    assert!(err.is_fatal());

    assert!(signal.is_aborted());
    assert_eq!(snapshots.borrow_and_update().state, SessionState::Aborted);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(transport.cancels(), 1);
    assert_eq!(handler.events(), vec![Event::Open(200)]);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_on_open_stays_within_its_session() {
    let shared = AbortSignal::new();

    let healthy_transport = ScriptedTransport::new(vec![Script::held(vec![headers()])]);
    let healthy = EventSource::new(config(), healthy_transport.clone(), Recorder::default())
        .unwrap()
        .with_abort_signal(shared.clone())
        .spawn();
    let mut healthy_snapshots = healthy.subscribe();
    healthy_snapshots
        .wait_for(|s| s.state == SessionState::Open)
        .await
        .unwrap();

    let rejecting = EventSource::new(
        config(),
        ScriptedTransport::new(vec![Script::held(vec![headers()])]),
        Recorder {
            reject_open: true,
            ..Recorder::default()
        },
    )
    .unwrap()
    .with_abort_signal(shared.clone())
    .spawn();
    let err = rejecting.join().await.unwrap_err();
    assert!(matches!(err, EventSourceError::Open(_)));

    // The sibling keeps streaming on the shared signal
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!shared.is_aborted());
    assert!(!healthy.is_aborted());
    assert_eq!(healthy.state(), SessionState::Open);
    assert_eq!(healthy_transport.cancels(), 0);

    // Aborting the shared signal still reaches every session on it
    shared.abort();
    healthy.join().await.unwrap();
    assert_eq!(healthy_snapshots.borrow().state, SessionState::Aborted);
    assert_eq!(healthy_transport.cancels(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_is_final() {
    let transport = ScriptedTransport::new(vec![Script::held(vec![
        headers(),
        chunk("data: first\n\n"),
    ])]);
    let handler = Arc::new(Recorder::retrying(Duration::from_millis(10)));

    let handle = EventSource::new(config(), transport.clone(), Arc::clone(&handler))
        .unwrap()
        .spawn();
    let mut snapshots = handle.subscribe();
    snapshots
        .wait_for(|s| s.state == SessionState::Open)
        .await
        .unwrap();
    while handler.events().len() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.abort();
    handle.abort();
    assert!(handle.is_aborted());
    let seen = handler.events();

    // Signals arriving after the abort reach nobody
    transport.push_to_held(chunk("data: late\n\n"));
    transport.push_to_held(TransportSignal::Completed);

    let signal = handle.abort_signal();
    handle.join().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(signal.is_aborted());
    assert_eq!(snapshots.borrow().state, SessionState::Aborted);
    assert_eq!(handler.events(), seen);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(transport.cancels(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_cancels_pending_retry() {
    let transport = ScriptedTransport::new(vec![Script::OpenError(
        TransportError::ConnectionFailed("refused".to_string()),
    )]);
    let handler = Arc::new(Recorder::retrying(Duration::from_secs(60)));

    let handle = EventSource::new(config(), transport.clone(), Arc::clone(&handler))
        .unwrap()
        .spawn();
    let mut snapshots = handle.subscribe();
    snapshots
        .wait_for(|s| s.state == SessionState::Retrying)
        .await
        .unwrap();

    let started = Instant::now();
    handle.abort();
    handle.join().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(snapshots.borrow().state, SessionState::Aborted);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(handler.count(is_error), 1);
}

// ============================================================================
// Processing errors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_message_error_drops_rest_of_chunk() {
    let transport = ScriptedTransport::new(vec![Script::closing(&[
        "id: 1\ndata: ok\n\nid: 2\ndata: bad\n\ndata: dropped\n\n",
        "data: next\n\n",
    ])]);
    let handler = Arc::new(Recorder {
        reject_data: Some("bad\n"),
        retry_delay: Some(Duration::from_millis(10)),
        ..Recorder::default()
    });

    let source = EventSource::new(
        config().open_when_hidden(true),
        transport.clone(),
        Arc::clone(&handler),
    )
    .unwrap();
    let snapshots = source.subscribe();
    source.run().await.unwrap();

    assert_eq!(
        handler.events(),
        vec![
            Event::Open(200),
            Event::Message(Message::new("ok\n").with_id("1")),
            Event::Message(Message::new("bad\n").with_id("2")),
            Event::Error("Message handler failed: Handler error: cannot handle message".to_string()),
            // The following chunk is delivered again
            Event::Message(Message::new("next\n")),
            Event::Close,
        ]
    );

    // Only a successfully handled message advances the last event id
    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.last_event_id, "1");
    assert_eq!(snapshot.state, SessionState::Terminated);
    // The retry delay returned for a processing error is ignored
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_over_long_line_is_reported() {
    let transport = ScriptedTransport::new(vec![Script::closing(&[
        "data: this line is far too long\n\ndata: fine\n\n",
    ])]);
    let handler = Arc::new(Recorder::default());

    EventSource::new(
        config().open_when_hidden(true).max_line_length(Some(16)),
        transport,
        Arc::clone(&handler),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let events = handler.events();
    assert!(events.contains(&Event::Message(Message::new("fine\n"))));
    assert_eq!(handler.count(is_error), 1);
    assert!(matches!(&events[2], Event::Error(e) if e.starts_with("Parse error")));
}

#[tokio::test(start_paused = true)]
async fn test_metrics_track_the_session() {
    let transport = ScriptedTransport::new(vec![
        Script::closing(&["data: a\n\n", "data: b\n\n"]),
        Script::OpenError(TransportError::ConnectionFailed("refused".to_string())),
    ]);
    let handler = Arc::new(Recorder::default());

    let handle = EventSource::new(config(), transport, Arc::clone(&handler))
        .unwrap()
        .spawn();
    let mut snapshots = handle.subscribe();
    snapshots
        .wait_for(|s| s.state.is_terminal())
        .await
        .unwrap();

    let metrics = handle.metrics();
    assert_eq!(metrics.connection_attempts, 2);
    assert_eq!(metrics.connections_opened, 1);
    assert_eq!(metrics.failed_connections, 1);
    assert_eq!(metrics.chunks_received, 2);
    assert_eq!(metrics.bytes_received, 18);
    assert_eq!(metrics.messages_received, 2);
    assert_eq!(metrics.retries_scheduled, 1);
    assert_eq!(metrics.processing_errors, 0);
    handle.join().await.unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = EventSource::new(
        EventSourceConfig::new("ftp://stream.test/events"),
        ScriptedTransport::default(),
        Recorder::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EventSourceError::Configuration(_)));
}
