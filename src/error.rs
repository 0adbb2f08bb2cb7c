use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::{BackendError, SessionId};
use crate::session::RegistryError;

/// Errors surfaced to callers of the multiplexer.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("failed to spawn session in {cwd:?}: {source}")]
    Spawn {
        cwd: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Which fire-and-forget call to the backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Close,
    Resize,
    SendInput,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close => f.write_str("close"),
            Self::Resize => f.write_str("resize"),
            Self::SendInput => f.write_str("send_input"),
        }
    }
}

/// A non-fatal failure observed by the multiplexer.
///
/// None of these alter registry state. They are handed to the
/// [`FailureHook`] so embedders (and tests) can see them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// `create` did not succeed; nothing was registered.
    Spawn { cwd: String, reason: String },
    /// A best-effort `close`/`resize`/`send_input` call failed.
    Transport {
        op: TransportOp,
        session: SessionId,
        reason: String,
    },
    /// An output chunk could not be decoded and was skipped.
    Render { session: SessionId, reason: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { cwd, reason } => write!(f, "spawn in {cwd:?} failed: {reason}"),
            Self::Transport { op, session, reason } => {
                write!(f, "{op} for session {session} failed: {reason}")
            }
            Self::Render { session, reason } => {
                write!(f, "dropped undecodable output for session {session}: {reason}")
            }
        }
    }
}

/// Sink for non-fatal failures.
#[derive(Clone)]
pub struct FailureHook(Arc<dyn Fn(&Failure) + Send + Sync>);

impl FailureHook {
    pub fn new(f: impl Fn(&Failure) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn report(&self, failure: Failure) {
        (self.0)(&failure);
    }
}

impl Default for FailureHook {
    /// Logs every failure at `warn`.
    fn default() -> Self {
        Self::new(|failure| match failure {
            Failure::Spawn { cwd, reason } => {
                tracing::warn!(cwd = %cwd, reason = %reason, "failed to spawn session");
            }
            Failure::Transport { op, session, reason } => {
                tracing::warn!(session = %session, op = %op, reason = %reason, "backend call failed");
            }
            Failure::Render { session, reason } => {
                tracing::warn!(session = %session, reason = %reason, "dropped output chunk");
            }
        })
    }
}

impl fmt::Debug for FailureHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureHook").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn hook_receives_reported_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook = FailureHook::new(move |f| sink.lock().push(f.clone()));

        hook.report(Failure::Transport {
            op: TransportOp::Close,
            session: SessionId::from("term-1"),
            reason: "gone".into(),
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(
            matches!(&seen[0], Failure::Transport { op: TransportOp::Close, session, .. } if session.as_str() == "term-1"),
            "unexpected failure: {:?}",
            seen[0]
        );
    }

    #[test]
    fn default_hook_does_not_panic() {
        FailureHook::default().report(Failure::Spawn {
            cwd: "/nowhere".into(),
            reason: "no such directory".into(),
        });
    }

    #[test]
    fn failure_display_names_the_operation() {
        let f = Failure::Transport {
            op: TransportOp::Resize,
            session: SessionId::from("term-9"),
            reason: "closed".into(),
        };
        assert_eq!(f.to_string(), "resize for session term-9 failed: closed");
    }
}
