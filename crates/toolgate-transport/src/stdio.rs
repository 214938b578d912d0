//! Newline-framed stdio transports.
//!
//! Each message is one line of JSON terminated by a single `\n`; received
//! messages are the content of one line. Lines are read by a dedicated
//! worker task feeding a channel, so `receive` can honor cancellation even
//! while the underlying read is blocked.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ClientTransport, Transport, TransportError};

/// Channel depth between the reader worker and `receive` callers.
const INCOMING_BUFFER: usize = 64;

/// Spawns a reader worker that forwards complete lines into a channel.
///
/// The worker exits when the stream ends or the transport context is
/// cancelled; either way the channel closes and pending receivers observe
/// [`TransportError::Closed`].
fn spawn_line_reader<R>(
    reader: R,
    ctx: CancellationToken,
) -> (mpsc::Receiver<Vec<u8>>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if tx.send(line.into_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdio stream reached EOF");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "stdio read failed");
                        break;
                    }
                },
            }
        }
    });
    (rx, handle)
}

/// Receives the next line from the worker channel, honoring cancellation.
async fn receive_line(
    incoming: &Mutex<mpsc::Receiver<Vec<u8>>>,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, TransportError> {
    let mut rx = incoming.lock().await;
    tokio::select! {
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        message = rx.recv() => message.ok_or(TransportError::Closed),
    }
}

/// Writes one framed message, honoring cancellation.
async fn send_line<W>(
    writer: &Mutex<W>,
    cancel: &CancellationToken,
    message: &[u8],
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut w = writer.lock().await;
    tokio::select! {
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = async {
            w.write_all(message).await?;
            w.write_all(b"\n").await?;
            w.flush().await
        } => result.map_err(TransportError::Io),
    }
}

/// Command line for the child process a [`StdioClientTransport`] spawns.
#[derive(Debug, Clone, Default)]
pub struct StdioCommand {
    pub command: String,
    pub args: Vec<String>,
    /// Environment overrides, merged onto the parent environment.
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl StdioCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

struct StdioChild {
    child: Child,
    reader: JoinHandle<()>,
}

/// Client transport that spawns a child process and speaks newline-framed
/// JSON over its stdin/stdout. Stderr is left attached to the parent and is
/// not interpreted.
pub struct StdioClientTransport {
    command: StdioCommand,
    ctx: CancellationToken,
    stdin: Mutex<Option<ChildStdin>>,
    incoming: Mutex<Option<Mutex<mpsc::Receiver<Vec<u8>>>>>,
    inner: Mutex<Option<StdioChild>>,
    closed: AtomicBool,
}

impl StdioClientTransport {
    pub fn new(command: StdioCommand) -> Self {
        Self {
            command,
            ctx: CancellationToken::new(),
            stdin: Mutex::new(None),
            incoming: Mutex::new(None),
            inner: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ClientTransport for StdioClientTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut cmd = tokio::process::Command::new(&self.command.command);
        cmd.args(&self.command.args)
            .envs(&self.command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Other("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Other("child stdout unavailable".to_string()))?;

        let (rx, reader) = spawn_line_reader(stdout, self.ctx.child_token());

        *self.stdin.lock().await = Some(stdin);
        *self.incoming.lock().await = Some(Mutex::new(rx));
        *self.inner.lock().await = Some(StdioChild { child, reader });
        debug!(command = %self.command.command, "stdio transport started");
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioClientTransport {
    async fn send(&self, cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotStarted)?;
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = async {
                stdin.write_all(message).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            } => result.map_err(TransportError::Io),
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let guard = self.incoming.lock().await;
        let incoming = guard.as_ref().ok_or(TransportError::NotStarted)?;
        receive_line(incoming, cancel).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ctx.cancel();
        // Dropping stdin signals EOF to well-behaved children.
        self.stdin.lock().await.take();
        if let Some(mut inner) = self.inner.lock().await.take() {
            inner.reader.abort();
            match inner.child.wait().await {
                Ok(status) => debug!(%status, "stdio child exited"),
                Err(e) => {
                    warn!(error = %e, "waiting for stdio child failed, killing");
                    let _ = inner.child.kill().await;
                }
            }
        }
        Ok(())
    }
}

/// Server transport over the host process's own standard input/output.
pub struct StdioServerTransport {
    ctx: CancellationToken,
    stdout: Mutex<tokio::io::Stdout>,
    incoming: Mutex<mpsc::Receiver<Vec<u8>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StdioServerTransport {
    pub fn new() -> Self {
        let ctx = CancellationToken::new();
        let (rx, reader) = spawn_line_reader(tokio::io::stdin(), ctx.child_token());
        Self {
            ctx,
            stdout: Mutex::new(tokio::io::stdout()),
            incoming: Mutex::new(rx),
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for StdioServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioServerTransport {
    async fn send(&self, cancel: &CancellationToken, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        send_line(&self.stdout, cancel, message).await
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        receive_line(&self.incoming, cancel).await
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
