//! HTTP client transports: SSE-backed and plain request/response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sse::SseParser;
use crate::{ClientTransport, Transport, TransportError};

const SESSION_HEADER: &str = "X-Session-ID";
const INCOMING_BUFFER: usize = 64;

/// Client transport speaking `POST <base>` upstream and reading the
/// `GET <base>/sse` event stream downstream.
///
/// `start()` generates a fresh session id, opens the SSE stream, and adopts
/// the id the server echoes back in its `session` event. Responses arrive
/// either synchronously in a POST's 200 body or asynchronously as `message`
/// events; both are funneled into one incoming queue.
pub struct HttpSseClientTransport {
    base_url: String,
    http: reqwest::Client,
    ctx: CancellationToken,
    session_id: Arc<std::sync::Mutex<String>>,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl HttpSseClientTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            ctx: CancellationToken::new(),
            session_id: Arc::new(std::sync::Mutex::new(String::new())),
            incoming_tx: tx,
            incoming: Mutex::new(rx),
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn current_session(&self) -> String {
        self.session_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ClientTransport for HttpSseClientTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let session = uuid::Uuid::new_v4().to_string();
        *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = session.clone();

        let url = format!("{}/sse?sessionId={}", self.base_url, session);
        let response = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "sse stream returned status {}",
                response.status()
            )));
        }

        let ctx = self.ctx.child_token();
        let tx = self.incoming_tx.clone();
        let session_slot = Arc::clone(&self.session_id);
        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            let mut buffer = Vec::new();
            loop {
                let chunk = tokio::select! {
                    _ = ctx.cancelled() => break,
                    chunk = stream.next() => chunk,
                };
                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        warn!(error = %e, "sse stream read failed");
                        break;
                    }
                    None => {
                        debug!("sse stream ended");
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    if let Some(event) = parser.push_line(&line) {
                        match event.event.as_str() {
                            "session" => {
                                *session_slot.lock().unwrap_or_else(|e| e.into_inner()) =
                                    event.data;
                            }
                            "message" => {
                                if tx.send(event.data.into_bytes()).await.is_err() {
                                    return;
                                }
                            }
                            other => debug!(event = other, "ignoring sse event"),
                        }
                    }
                }
            }
        });
        *self.reader.lock().await = Some(handle);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpSseClientTransport {
    async fn send(&self, cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }

        let request = self
            .http
            .post(&self.base_url)
            .header(SESSION_HEADER, self.current_session())
            .header("Content-Type", "application/json")
            .body(message.to_vec())
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = request => response.map_err(|e| TransportError::Http(e.to_string()))?,
        };

        match response.status().as_u16() {
            200 => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                if !body.is_empty() {
                    let _ = self.incoming_tx.send(body.to_vec()).await;
                }
                Ok(())
            }
            // Accepted: the response will arrive over the SSE stream.
            202 => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::Http(format!(
                    "unexpected status {}: {}",
                    status, body
                )))
            }
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }
        let mut rx = self.incoming.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            message = rx.recv() => message.ok_or(TransportError::SseConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ctx.cancel();
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        Ok(())
    }
}

/// Request/response HTTP transport without an event stream.
///
/// `send` POSTs one message; a non-empty 200 body is queued and later
/// drained by `receive`.
pub struct PlainHttpTransport {
    base_url: String,
    http: reqwest::Client,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl PlainHttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            incoming_tx: tx,
            incoming: Mutex::new(rx),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClientTransport for PlainHttpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for PlainHttpTransport {
    async fn send(&self, cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }

        let request = self
            .http
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .body(message.to_vec())
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = request => response.map_err(|e| TransportError::Http(e.to_string()))?,
        };

        if response.status().as_u16() != 200 {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!(
                "unexpected status {}: {}",
                status, body
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !body.is_empty() {
            let _ = self.incoming_tx.send(body.to_vec()).await;
        }
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.incoming.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            message = rx.recv() => message.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
