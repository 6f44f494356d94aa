//! Sidecar transport over a child process's stdin/stdout.
//!
//! The child speaks JSON-RPC with `Content-Length` framing. A reader task
//! owns stdout and routes responses to their pending callers; stderr is
//! drained into the sidecar debug log.

use super::error::TransportError;
use super::framing::{read_message, write_message, Incoming, JsonRpcRequest, JsonRpcResponse};
use super::protocol::notifications;
use super::transport::{SidecarTransport, TransportEvent};
use crate::sidecar_log::sidecar_log;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct StdioTransportConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Sent verbatim as `initializationOptions` in the `initialize` request.
    pub initialization_options: Value,
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl StdioTransportConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
            initialization_options: json!({}),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>;

/// One live JSON-RPC session over a byte stream pair.
pub(crate) struct Connection {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: StdMutex<PendingMap>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            writer: Mutex::new(writer),
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            // `fail_all` closes under this lock, so a request is either
            // registered before the drain or sees the connection closed.
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            pending.insert(id, tx);
        }

        let request = JsonRpcRequest::request(id, method, params);
        let written = {
            let mut writer = self.writer.lock().await;
            write_message(&mut *writer, &request).await
        };
        if let Err(e) = written {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(e);
        }

        rx.await.unwrap_or(Err(TransportError::Closed))
    }

    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, &JsonRpcRequest::notification(method, params)).await
    }

    async fn respond(&self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, &response).await
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_u64() else {
            warn!(id = %response.id, "response with non-numeric id");
            return;
        };
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(response.into_result());
            }
            None => debug!(id, "response for unknown or abandoned request"),
        }
    }

    /// Marks the connection closed and rejects every pending request.
    fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().collect()
        };
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(TransportError::Closed));
        }
        count
    }
}

/// Wires a connection over `reader`/`writer`, spawns its reader task, and
/// performs the `initialize` / `initialized` handshake.
pub(crate) async fn attach<R, W>(
    reader: R,
    writer: W,
    events: UnboundedSender<TransportEvent>,
    initialization_options: Value,
    handshake_timeout: Duration,
) -> Result<(Arc<Connection>, JoinHandle<()>), TransportError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let connection = Arc::new(Connection::new(Box::new(writer)));
    let reader_task = tokio::spawn(read_loop(
        BufReader::new(reader),
        Arc::downgrade(&connection),
        events,
    ));

    let params = json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "rootUri": Value::Null,
        "capabilities": {},
        "initializationOptions": initialization_options,
    });

    let handshake =
        tokio::time::timeout(handshake_timeout, connection.call("initialize", params)).await;
    match handshake {
        Ok(Ok(_capabilities)) => {}
        Ok(Err(e)) => {
            reader_task.abort();
            return Err(e);
        }
        Err(_) => {
            reader_task.abort();
            return Err(TransportError::HandshakeTimeout);
        }
    }
    if let Err(e) = connection.notify("initialized", Some(json!({}))).await {
        reader_task.abort();
        return Err(e);
    }

    Ok((connection, reader_task))
}

async fn read_loop<R>(
    mut reader: BufReader<R>,
    connection: Weak<Connection>,
    events: UnboundedSender<TransportEvent>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let body = match read_message(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break "sidecar closed its output".to_string(),
            Err(e) => break e.to_string(),
        };

        let message = match Incoming::parse(&body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed sidecar message");
                sidecar_log("transport", &format!("malformed message: {}", e));
                continue;
            }
        };

        let Some(conn) = connection.upgrade() else {
            return;
        };
        match message {
            Incoming::Response(response) => conn.resolve(response),
            Incoming::Request { id, method } => {
                debug!(%method, "acknowledging sidecar request");
                if let Err(e) = conn.respond(JsonRpcResponse::success(id, Value::Null)).await {
                    warn!(error = %e, %method, "failed to acknowledge sidecar request");
                }
            }
            Incoming::Notification { method, params } => {
                if method == notifications::LOG_MESSAGE || method == notifications::SHOW_MESSAGE {
                    let text = params
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    sidecar_log("logMessage", text);
                } else {
                    let _ = events.send(TransportEvent::Notification { method, params });
                }
            }
        }
    };

    if let Some(conn) = connection.upgrade() {
        let rejected = conn.fail_all();
        if rejected > 0 {
            warn!(rejected, "rejected pending sidecar requests after stream closed");
        }
    }
    sidecar_log("transport", &format!("reader exited: {}", reason));
    let _ = events.send(TransportEvent::Exited { reason });
}

struct RunningSidecar {
    connection: Arc<Connection>,
    child: Child,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// Launches and talks to the sidecar as a child process.
pub struct StdioTransport {
    config: StdioTransportConfig,
    running: Mutex<Option<RunningSidecar>>,
}

impl StdioTransport {
    pub fn new(config: StdioTransportConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    async fn current_connection(&self) -> Result<Arc<Connection>, TransportError> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .map(|r| Arc::clone(&r.connection))
            .ok_or(TransportError::NotStarted)
    }

    async fn shut_down(&self, mut sidecar: RunningSidecar) {
        let grace = self.config.shutdown_grace;
        if !sidecar.connection.is_closed() {
            let shutdown = sidecar.connection.call("shutdown", Value::Null);
            match tokio::time::timeout(grace, shutdown).await {
                Ok(Ok(_)) => {
                    let _ = sidecar.connection.notify("exit", None).await;
                }
                Ok(Err(e)) => debug!(error = %e, "sidecar shutdown request failed"),
                Err(_) => debug!("sidecar shutdown request timed out"),
            }
        }

        match tokio::time::timeout(grace, sidecar.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "sidecar exited"),
            _ => {
                warn!(?grace, "sidecar did not exit within grace period, killing");
                let _ = sidecar.child.kill().await;
            }
        }
        sidecar.stderr_task.abort();
        sidecar.reader_task.abort();
    }
}

#[async_trait]
impl SidecarTransport for StdioTransport {
    async fn start(&self, events: UnboundedSender<TransportEvent>) -> Result<(), TransportError> {
        let stale = {
            let mut running = self.running.lock().await;
            if running
                .as_ref()
                .is_some_and(|existing| !existing.connection.is_closed())
            {
                return Ok(());
            }
            running.take()
        };
        if let Some(stale) = stale {
            self.shut_down(stale).await;
        }

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| TransportError::Spawn {
            message: format!("{}: {}", self.config.program, e),
        })?;
        info!(program = %self.config.program, pid = ?child.id(), "spawned sidecar");

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill().await;
            return Err(TransportError::Spawn {
                message: "sidecar stdio was not captured".to_string(),
            });
        };

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sidecar_log("stderr", &line);
            }
        });

        let attached = attach(
            stdout,
            stdin,
            events,
            self.config.initialization_options.clone(),
            self.config.handshake_timeout,
        )
        .await;

        let (connection, reader_task) = match attached {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "sidecar handshake failed");
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(e);
            }
        };

        *self.running.lock().await = Some(RunningSidecar {
            connection,
            child,
            reader_task,
            stderr_task,
        });
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let connection = self.current_connection().await?;
        connection.call(method, params).await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let sidecar = self.running.lock().await.take();
        match sidecar {
            Some(sidecar) => {
                self.shut_down(sidecar).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "tests/stdio_transport_tests.rs"]
mod tests;
