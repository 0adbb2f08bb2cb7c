//! Contract with the external process-spawning service.
//!
//! The multiplexer never touches processes directly. It asks a [`Backend`]
//! to spawn, resize, feed and close them, and listens to the per-session
//! output and exit channels the backend hands out.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::pty::PtyError;

/// Opaque session identifier issued by the backend. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("session not found: {0}")]
    UnknownSession(SessionId),

    #[error("session {0} is already subscribed")]
    AlreadySubscribed(SessionId),

    #[error("transport closed for session {0}")]
    Closed(SessionId),

    #[error("pty error: {0}")]
    Pty(#[from] PtyError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream of base64-encoded output chunks, in emission order.
pub type OutputStream = mpsc::UnboundedReceiver<String>;

/// Fires at most once, when the session's process exits.
pub type ExitSignal = oneshot::Receiver<()>;

/// External process-spawning/streaming service.
///
/// `spawn` is awaited before a session becomes visible; `close`, `resize`
/// and `send_input` are issued fire-and-forget and their errors are only
/// reported, never acted on.
pub trait Backend: Send + Sync + 'static {
    /// Start a new process rooted at `cwd` (empty means "let the backend choose").
    fn spawn(&self, cwd: &str) -> impl Future<Output = Result<SessionId, BackendError>> + Send;

    fn close(&self, id: &SessionId) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn resize(
        &self,
        id: &SessionId,
        rows: u16,
        cols: u16,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn send_input(
        &self,
        id: &SessionId,
        data: Bytes,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Take the output channel for `id`. Each session's channel can be taken once.
    fn subscribe_output(&self, id: &SessionId) -> Result<OutputStream, BackendError>;

    /// Take the exit channel for `id`. Each session's channel can be taken once.
    fn subscribe_exit(&self, id: &SessionId) -> Result<ExitSignal, BackendError>;
}
