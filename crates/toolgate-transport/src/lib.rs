//! # toolgate-transport
//!
//! Framed byte pipes carrying remote tool protocol messages.
//!
//! A [`Transport`] is a bidirectional, message-framed pipe. Two families are
//! provided:
//!
//! - **stdio**: newline-delimited JSON over a child process's stdin/stdout
//!   ([`StdioClientTransport`]) or over the host process's own standard
//!   streams ([`StdioServerTransport`]).
//! - **HTTP**: a `POST` endpoint for client-to-server bodies plus a
//!   server-sent-events stream for server-to-client delivery
//!   ([`HttpSseClientTransport`], [`HttpSseServerTransport`]), and a
//!   plain request/response variant without SSE ([`PlainHttpTransport`]).
//!
//! All blocking operations take a [`CancellationToken`]; cancellation wins
//! over any in-flight read or write and leaves the transport usable.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod http_client;
pub mod http_server;
pub mod sse;
pub mod stdio;

pub use http_client::{HttpSseClientTransport, PlainHttpTransport};
pub use http_server::HttpSseServerTransport;
pub use stdio::{StdioClientTransport, StdioCommand, StdioServerTransport};

/// Errors surfaced by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has been closed and cannot carry further messages.
    #[error("transport closed")]
    Closed,
    /// A send or receive was attempted before `start()`.
    #[error("transport not started")]
    NotStarted,
    /// The HTTP session id is unknown to the server.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// The server-sent-events stream ended.
    #[error("sse connection closed")]
    SseConnectionClosed,
    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(String),
    #[error("{0}")]
    Other(String),
}

/// A bidirectional, framed byte pipe.
///
/// `receive` is a single-reader contract: the transport owns one reader
/// worker, and callers must not race multiple concurrent receivers.
/// Concurrent `send`s are serialized internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one framed message.
    async fn send(&self, cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError>;

    /// Receives the next framed message.
    ///
    /// Honors `cancel` even while the underlying read is blocked; a
    /// cancelled receive leaves the transport usable for future reads.
    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError>;

    /// Releases the transport's resources. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A transport whose connection is established explicitly by the client.
///
/// Server transports are started implicitly at construction.
#[async_trait]
pub trait ClientTransport: Transport {
    async fn start(&self) -> Result<(), TransportError>;
}
