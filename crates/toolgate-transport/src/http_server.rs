//! Server-side HTTP+SSE transport, mounted as an axum router.
//!
//! Clients POST one JSON-RPC body at a time to the base route (carrying
//! `X-Session-ID`) and read server-to-client traffic from `GET /sse`.
//! Replies are session-targeted: a POST waiting on its session's reply slot
//! receives the bytes synchronously with status 200, otherwise the bytes go
//! out as a `message` event on the session's SSE stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Transport, TransportError};

const SESSION_HEADER: &str = "X-Session-ID";
const INCOMING_BUFFER: usize = 64;
const SESSION_BUFFER: usize = 16;

/// Default wait for a synchronous POST reply and default heartbeat interval.
const DEFAULT_RESPONSE_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

struct Session {
    id: String,
    sse_tx: mpsc::Sender<Vec<u8>>,
    /// Taken exactly once by the SSE handler that streams this session.
    sse_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    /// Reply slot for the POST currently blocked on this session, if any.
    pending_post: std::sync::Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

struct ServerInner {
    ctx: CancellationToken,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    incoming_tx: mpsc::Sender<(String, Vec<u8>)>,
    response_wait: Duration,
    heartbeat: Duration,
}

impl ServerInner {
    fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn open_session(&self, id: String) -> Arc<Session> {
        let (sse_tx, sse_rx) = mpsc::channel(SESSION_BUFFER);
        let session = Arc::new(Session {
            id: id.clone(),
            sse_tx,
            sse_rx: Mutex::new(Some(sse_rx)),
            pending_post: std::sync::Mutex::new(None),
        });
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&session));
        session
    }

    /// Handles one POSTed message: enqueue it and wait for the session's
    /// reply slot to be filled.
    async fn post_message(&self, session_id: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let Some(session) = self.session(session_id) else {
            return (StatusCode::NOT_FOUND, b"session not found".to_vec());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut slot = session
                .pending_post
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *slot = Some(reply_tx);
        }

        if self
            .incoming_tx
            .send((session_id.to_string(), body))
            .await
            .is_err()
        {
            return (StatusCode::SERVICE_UNAVAILABLE, b"transport closed".to_vec());
        }

        match tokio::time::timeout(self.response_wait, reply_rx).await {
            Ok(Ok(bytes)) => (StatusCode::OK, bytes),
            _ => {
                // Timed out or the slot was dropped; clear a stale slot so a
                // late reply falls through to the SSE stream.
                let mut slot = session
                    .pending_post
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                slot.take();
                (StatusCode::GATEWAY_TIMEOUT, b"response timeout".to_vec())
            }
        }
    }
}

/// The HTTP+SSE server transport. Started implicitly at construction;
/// mount [`HttpSseServerTransport::router`] into the host's HTTP server.
pub struct HttpSseServerTransport {
    inner: Arc<ServerInner>,
    incoming: Mutex<mpsc::Receiver<(String, Vec<u8>)>>,
    /// Session that produced the message currently being processed by the
    /// message loop; replies are routed back to it.
    current_session: std::sync::Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpSseServerTransport {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_RESPONSE_WAIT, DEFAULT_HEARTBEAT)
    }

    pub fn with_timing(response_wait: Duration, heartbeat: Duration) -> Self {
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        Self {
            inner: Arc::new(ServerInner {
                ctx: CancellationToken::new(),
                sessions: RwLock::new(HashMap::new()),
                incoming_tx: tx,
                response_wait,
                heartbeat,
            }),
            incoming: Mutex::new(rx),
            current_session: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// The axum router exposing `POST /` and `GET /sse`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_post))
            .route("/sse", get(handle_sse))
            .with_state(Arc::clone(&self.inner))
    }

    /// Number of sessions currently open. Mainly useful in tests.
    pub fn session_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for HttpSseServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_post(
    State(inner): State<Arc<ServerInner>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(session_id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return (StatusCode::BAD_REQUEST, b"missing X-Session-ID header".to_vec());
    };
    inner.post_message(session_id, body.to_vec()).await
}

async fn handle_sse(
    State(inner): State<Arc<ServerInner>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let session_id = params
        .get("sessionId")
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = inner.open_session(session_id.clone());
    debug!(session = %session_id, "sse stream opened");

    enum StreamState {
        Announce(Arc<Session>, CancellationToken),
        Forward(mpsc::Receiver<Vec<u8>>, CancellationToken),
        Done,
    }

    let heartbeat = inner.heartbeat;
    let stream = futures_util::stream::unfold(
        StreamState::Announce(session, inner.ctx.child_token()),
        |state| async move {
            match state {
                StreamState::Announce(session, ctx) => {
                    let announce = Event::default().event("session").data(session.id.clone());
                    let next = match session.sse_rx.lock().await.take() {
                        Some(rx) => StreamState::Forward(rx, ctx),
                        // A second stream for the same session gets the
                        // announcement only.
                        None => StreamState::Done,
                    };
                    Some((Ok::<_, Infallible>(announce), next))
                }
                StreamState::Forward(mut rx, ctx) => {
                    let message = tokio::select! {
                        _ = ctx.cancelled() => None,
                        message = rx.recv() => message,
                    };
                    message.map(|bytes| {
                        let data = String::from_utf8_lossy(&bytes).into_owned();
                        (
                            Ok(Event::default().event("message").data(data)),
                            StreamState::Forward(rx, ctx),
                        )
                    })
                }
                StreamState::Done => None,
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"))
}

#[async_trait]
impl Transport for HttpSseServerTransport {
    async fn send(&self, cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let session_id = self
            .current_session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| TransportError::Other("no session awaiting a reply".to_string()))?;
        let session = self
            .inner
            .session(&session_id)
            .ok_or(TransportError::SessionNotFound(session_id))?;

        let waiting_post = session
            .pending_post
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reply_tx) = waiting_post {
            if let Err(bytes) = reply_tx.send(message.to_vec()) {
                // The POST gave up in the meantime; deliver via SSE instead.
                warn!(session = %session.id, "post waiter gone, falling back to sse");
                return self.send_sse(cancel, &session, bytes).await;
            }
            return Ok(());
        }
        self.send_sse(cancel, &session, message.to_vec()).await
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.incoming.lock().await;
        let (session_id, bytes) = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            message = rx.recv() => message.ok_or(TransportError::Closed)?,
        };
        *self
            .current_session
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(session_id);
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.ctx.cancel();
        self.inner
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

impl HttpSseServerTransport {
    async fn send_sse(
        &self,
        cancel: &CancellationToken,
        session: &Session,
        bytes: Vec<u8>,
    ) -> Result<(), TransportError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            sent = session.sse_tx.send(bytes) => {
                sent.map_err(|_| TransportError::SseConnectionClosed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_unknown_session_is_404() {
        let transport = HttpSseServerTransport::new();
        let (status, _) = transport.inner.post_message("nope", b"{}".to_vec()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_without_consumer_times_out() {
        let transport =
            HttpSseServerTransport::with_timing(Duration::from_millis(50), DEFAULT_HEARTBEAT);
        transport.inner.open_session("s1".to_string());

        let (status, _) = transport.inner.post_message("s1", b"{}".to_vec()).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_post_gets_synchronous_reply() {
        let transport = Arc::new(HttpSseServerTransport::new());
        transport.inner.open_session("s1".to_string());

        let server = Arc::clone(&transport);
        let loop_task = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let request = server.receive(&cancel).await.unwrap();
            assert_eq!(request, b"\"ping\"");
            server.send(&cancel, b"\"pong\"").await.unwrap();
        });

        let (status, body) = transport.inner.post_message("s1", b"\"ping\"".to_vec()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"\"pong\"");
        loop_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_pending_post_goes_to_sse() {
        let transport = Arc::new(HttpSseServerTransport::with_timing(
            Duration::from_millis(20),
            DEFAULT_HEARTBEAT,
        ));
        let session = transport.inner.open_session("s1".to_string());
        let mut sse_rx = session.sse_rx.lock().await.take().unwrap();

        let server = Arc::clone(&transport);
        let loop_task = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let _request = server.receive(&cancel).await.unwrap();
            // Let the POST waiter time out before replying.
            tokio::time::sleep(Duration::from_millis(60)).await;
            server.send(&cancel, b"late reply").await.unwrap();
        });

        let (status, _) = transport.inner.post_message("s1", b"{}".to_vec()).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let late = sse_rx.recv().await.unwrap();
        assert_eq!(late, b"late reply");
        loop_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_io() {
        let transport = HttpSseServerTransport::new();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let cancel = CancellationToken::new();
        assert!(matches!(
            transport.receive(&cancel).await.unwrap_err(),
            TransportError::Closed
        ));
    }
}
