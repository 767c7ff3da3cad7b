//! End-to-end live sync: scripted push transport -> connection manager ->
//! router -> store / notifications, on a paused tokio clock.

use async_trait::async_trait;
use birdwatch_live::backend_client::BackendClient;
use birdwatch_live::detection_store::DetectionStore;
use birdwatch_live::live_router::{LiveRouter, RouterConfig};
use birdwatch_live::notification_center::{NotificationCenter, NotificationConfig};
use birdwatch_live::notification_policy::SystemClock;
use birdwatch_live::session_guard::SessionGuard;
use birdwatch_live::stream_client::{
    ConnectionState, MessageStream, PushTransport, StreamConnectionManager, TransportError,
};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

enum Step {
    Fail,
    Unauthorized,
    Hang,
    Open(Vec<String>),
    OpenThenClose(Vec<String>),
}

struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    opens: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            opens: Mutex::new(Vec::new()),
        })
    }

    fn opens(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn open(&self) -> Result<MessageStream, TransportError> {
        let step = {
            self.opens.lock().unwrap().push(Instant::now());
            self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail)
        };
        match step {
            Step::Fail => Err(TransportError::Status(503)),
            Step::Unauthorized => Err(TransportError::Unauthorized(401)),
            Step::Hang => futures::future::pending().await,
            Step::Open(messages) => Ok(stream::iter(messages.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Step::OpenThenClose(messages) => {
                Ok(stream::iter(messages.into_iter().map(Ok)).boxed())
            }
        }
    }
}

struct Harness {
    transport: Arc<ScriptedTransport>,
    store: Arc<DetectionStore>,
    notifications: Arc<NotificationCenter>,
    stream: Arc<StreamConnectionManager>,
    expired_calls: Arc<AtomicUsize>,
}

fn harness(steps: Vec<Step>) -> Harness {
    harness_with_backend(steps, None)
}

fn harness_with_backend(steps: Vec<Step>, backend: Option<Arc<BackendClient>>) -> Harness {
    let transport = ScriptedTransport::new(steps);
    let store = Arc::new(DetectionStore::default());
    let notifications = Arc::new(NotificationCenter::new(
        NotificationConfig::default(),
        Arc::new(SystemClock),
    ));
    let router = Arc::new(LiveRouter::new(
        store.clone(),
        notifications.clone(),
        backend,
        RouterConfig::default(),
    ));

    let expired_calls = Arc::new(AtomicUsize::new(0));
    let counter = expired_calls.clone();
    let session = Arc::new(SessionGuard::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let stream = StreamConnectionManager::new(transport.clone(), router, session);
    Harness {
        transport,
        store,
        notifications,
        stream,
        expired_calls,
    }
}

fn detection(event_id: &str, name: &str) -> String {
    json!({
        "type": "detection",
        "data": {
            "event_id": event_id,
            "display_name": name,
            "camera_name": "feeder",
            "score": 0.92,
            "detection_time": "2024-05-01T10:00:00Z"
        }
    })
    .to_string()
}

fn gaps(opens: &[Instant]) -> Vec<Duration> {
    opens.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_then_messages_applied() {
    let h = harness(vec![
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Open(vec![
            r#"{"type":"connected","data":{"message":"hello"}}"#.to_string(),
            detection("a", "Robin"),
            "not json".to_string(),
            detection("b", "Wren"),
        ]),
    ]);

    h.stream.connect().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let opens = h.transport.opens();
    assert_eq!(opens.len(), 4);
    let gaps = gaps(&opens);
    assert_close(gaps[0], Duration::from_secs(1));
    assert_close(gaps[1], Duration::from_secs(2));
    assert_close(gaps[2], Duration::from_secs(4));

    assert!(h.stream.is_connected());
    assert_eq!(h.stream.status().attempt, 0);
    assert!(h.store.connected().await);
    assert_eq!(h.store.len().await, 2);
    assert_eq!(h.notifications.list().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_closed_stream_reconnects_with_fresh_backoff() {
    let h = harness(vec![
        Step::OpenThenClose(vec![detection("a", "Robin")]),
        Step::Open(vec![detection("a", "Robin")]),
    ]);

    h.stream.connect().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let opens = h.transport.opens();
    assert_eq!(opens.len(), 2);
    assert_close(gaps(&opens)[0], Duration::from_secs(1));

    assert!(h.store.connected().await);
    // redelivered after reconnect, still one record and one notification
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.notifications.list().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_expiry_suspends_until_reauth() {
    let h = harness(vec![Step::Unauthorized, Step::Open(vec![])]);

    h.stream.connect().await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.transport.opens().len(), 1);
    assert_eq!(h.expired_calls.load(Ordering::SeqCst), 1);
    let status = h.stream.status();
    assert!(status.suspended);
    assert_eq!(status.state, ConnectionState::Disconnected);

    // visibility does not bypass the suspension
    h.stream.on_visibility_restored();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.opens().len(), 1);

    h.stream.resume_after_reauth().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.transport.opens().len(), 2);
    assert!(h.stream.is_connected());
    assert!(!h.stream.status().suspended);
    assert_eq!(h.expired_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_recovers_hung_connect() {
    let h = harness(vec![Step::Hang, Step::Open(vec![detection("a", "Robin")])]);

    h.stream.connect().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.stream.status().state, ConnectionState::Connecting);
    assert_eq!(h.transport.opens().len(), 1);

    h.stream.on_visibility_restored();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.transport.opens().len(), 2);
    assert!(h.stream.is_connected());
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_terminal() {
    let h = harness(vec![Step::Open(vec![]), Step::Open(vec![])]);

    h.stream.connect().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.store.connected().await);

    h.stream.disconnect().await;
    assert!(!h.store.connected().await);

    h.stream.on_visibility_restored();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.opens().len(), 1);
    assert_eq!(h.stream.status().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_while_connected_drops_live_flag() {
    let h = harness(vec![Step::Open(vec![]), Step::Hang]);

    h.stream.connect().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.store.connected().await);

    // the new attempt never resolves; the store must not keep claiming live
    h.stream.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.transport.opens().len(), 2);
    assert_eq!(h.stream.status().state, ConnectionState::Connecting);
    assert!(!h.stream.is_connected());
    assert!(!h.store.connected().await);
}

#[tokio::test]
async fn test_backend_rejecting_session_suspends_stream() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route(
        "/api/events",
        axum::routing::get(|| async { axum::http::StatusCode::UNAUTHORIZED }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let backend = Arc::new(BackendClient::new(format!("http://{}", addr), None).unwrap());

    let h = harness_with_backend(vec![Step::Open(vec![]), Step::Open(vec![])], Some(backend));
    h.stream.connect().await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while !h.stream.status().suspended && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = h.stream.status();
    assert!(status.suspended);
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(h.expired_calls.load(Ordering::SeqCst), 1);
    assert!(!h.store.connected().await);

    // no retry is scheduled while suspended
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.transport.opens().len(), 1);
}
