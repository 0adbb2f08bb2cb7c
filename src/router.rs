//! Per-session output routing.
//!
//! One task per session reads that session's output channel and feeds each
//! decoded chunk into its rendering surface, strictly in arrival order.

use base64::Engine;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ExitSignal, OutputStream, SessionId};
use crate::error::{Failure, FailureHook};
use crate::surface::SharedSurface;

/// Owned output + exit subscription for one session.
///
/// Dropping or [`unsubscribe`](Self::unsubscribe)-ing it guarantees that no
/// further write reaches the surface: the router re-checks the cancellation
/// token while holding the surface lock, so once `unsubscribe` returns, a
/// subsequent lock-and-dispose cannot race a write.
pub struct OutputSubscription {
    cancelled: CancellationToken,
    task: JoinHandle<()>,
}

impl OutputSubscription {
    pub fn spawn(
        id: SessionId,
        surface: SharedSurface,
        output: OutputStream,
        exit: ExitSignal,
        hook: FailureHook,
    ) -> Self {
        let cancelled = CancellationToken::new();
        let task = tokio::spawn(route(id, surface, output, exit, hook, cancelled.clone()));
        Self { cancelled, task }
    }

    pub fn unsubscribe(&self) {
        self.cancelled.cancel();
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.is_cancelled()
    }
}

impl Drop for OutputSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn route(
    id: SessionId,
    surface: SharedSurface,
    mut output: OutputStream,
    mut exit: ExitSignal,
    hook: FailureHook,
    cancelled: CancellationToken,
) {
    let mut output_open = true;
    let mut exit_pending = true;

    loop {
        tokio::select! {
            biased;
            _ = cancelled.cancelled() => break,
            chunk = output.recv(), if output_open => match chunk {
                Some(encoded) => deliver(&id, &surface, &hook, &cancelled, &encoded),
                None => output_open = false,
            },
            result = &mut exit, if exit_pending => {
                exit_pending = false;
                if result.is_err() {
                    // Backend dropped the channel without signalling an exit.
                    continue;
                }
                // Output queued before the exit still belongs above the marker.
                while let Ok(encoded) = output.try_recv() {
                    deliver(&id, &surface, &hook, &cancelled, &encoded);
                }
                let mut s = surface.lock();
                if cancelled.is_cancelled() {
                    break;
                }
                if let Err(e) = s.mark_exited() {
                    tracing::debug!(session = %id, ?e, "exit after surface disposal");
                }
                tracing::info!(session = %id, "session process exited");
            }
            else => break,
        }
    }
    tracing::debug!(session = %id, "output router stopped");
}

fn deliver(
    id: &SessionId,
    surface: &SharedSurface,
    hook: &FailureHook,
    cancelled: &CancellationToken,
    encoded: &str,
) {
    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(e) => {
            hook.report(Failure::Render {
                session: id.clone(),
                reason: e.to_string(),
            });
            return;
        }
    };
    let mut s = surface.lock();
    if cancelled.is_cancelled() {
        return;
    }
    if let Err(e) = s.write(&bytes) {
        tracing::debug!(session = %id, ?e, "dropping output for disposed surface");
    }
}
