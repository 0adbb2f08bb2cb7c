use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, SessionId};
use crate::error::{Failure, FailureHook, TransportOp};
use crate::resize::Geometry;

#[derive(Debug)]
enum Outbound {
    Input(Bytes),
    Resize(Geometry),
}

/// Ordered, fire-and-forget channel from one session to its backend process.
///
/// Keystrokes and geometry notifications are queued and sent one at a time
/// by a dedicated task, so they reach the backend in the order they were
/// issued. Callers never wait on the backend; failures go to the hook.
pub struct Transport {
    tx: mpsc::UnboundedSender<Outbound>,
    cancelled: CancellationToken,
}

impl Transport {
    pub fn spawn<B: Backend>(id: SessionId, backend: Arc<B>, hook: FailureHook) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = CancellationToken::new();
        tokio::spawn(run(id, backend, hook, rx, cancelled.clone()));
        Self { tx, cancelled }
    }

    pub fn send_input(&self, data: Bytes) {
        let _ = self.tx.send(Outbound::Input(data));
    }

    pub fn resize(&self, geometry: Geometry) {
        let _ = self.tx.send(Outbound::Resize(geometry));
    }

    /// Stop forwarding. Anything still queued is discarded.
    pub fn shutdown(&self) {
        self.cancelled.cancel();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancelled.cancel();
    }
}

async fn run<B: Backend>(
    id: SessionId,
    backend: Arc<B>,
    hook: FailureHook,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    cancelled: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancelled.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let (op, result) = match msg {
            Outbound::Input(data) => (TransportOp::SendInput, backend.send_input(&id, data).await),
            Outbound::Resize(g) => {
                tracing::debug!(session = %id, rows = g.rows, cols = g.cols, "notifying backend of geometry");
                (TransportOp::Resize, backend.resize(&id, g.rows, g.cols).await)
            }
        };
        if let Err(e) = result {
            hook.report(Failure::Transport {
                op,
                session: id.clone(),
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn input_and_resize_keep_issue_order() {
        let backend = FakeBackend::default();
        let id = backend.spawn("").await.unwrap();
        let transport = Transport::spawn(id.clone(), Arc::new(backend.clone()), FailureHook::default());

        transport.send_input(Bytes::from("a"));
        transport.resize(Geometry { rows: 10, cols: 40 });
        transport.send_input(Bytes::from("b"));
        transport.resize(Geometry { rows: 12, cols: 40 });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.inputs(), vec![(id.clone(), Bytes::from("a")), (id.clone(), Bytes::from("b"))]);
        assert_eq!(backend.resizes(), vec![(id.clone(), 10, 40), (id, 12, 40)]);
    }

    #[tokio::test]
    async fn shutdown_drops_queued_messages() {
        let backend = FakeBackend::default();
        let id = backend.spawn("").await.unwrap();
        let transport = Transport::spawn(id, Arc::new(backend.clone()), FailureHook::default());

        transport.shutdown();
        transport.send_input(Bytes::from("late"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend.inputs().is_empty());
    }
}
