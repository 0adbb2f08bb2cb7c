use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::backend::{Backend, BackendError, SessionId};
use crate::error::{Failure, FailureHook, MuxError, TransportOp};
use crate::resize::Geometry;
use crate::router::OutputSubscription;
use crate::surface::{RenderSurface, SharedSurface, SurfaceStyle, Theme};
use crate::transport::Transport;
use crate::view::{ViewHandle, ViewHost};

/// One backend process bound to one rendering surface and view.
///
/// Everything a session holds is exclusively its own: no two sessions
/// share a surface, a view, or a subscription.
pub struct Session {
    id: SessionId,
    display_name: String,
    created_seq: u64,
    surface: SharedSurface,
    view: Box<dyn ViewHandle>,
    subscription: OutputSubscription,
    transport: Transport,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("created_seq", &self.created_seq)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    pub fn view(&self) -> &dyn ViewHandle {
        self.view.as_ref()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Whether output is still being routed into the surface.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { id: SessionId, name: String },
    Renamed { id: SessionId, old_name: String, new_name: String },
    Destroyed { id: SessionId },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("invalid session name: {0:?}")]
    InvalidName(String),
}

/// Result of [`SessionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub registry_now_empty: bool,
}

/// Owns every live session, in creation order.
///
/// The only place sessions are built or torn down. Other components ask
/// for operations on it; they never mutate a `Session` directly.
pub struct SessionRegistry<B> {
    backend: Arc<B>,
    /// Ordered by `created_seq`; new sessions are always pushed at the end.
    sessions: Vec<Session>,
    active: Option<SessionId>,
    /// Feeds both default names and `created_seq`. Never reset.
    counter: u64,
    style: SurfaceStyle,
    hook: FailureHook,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl<B: Backend> SessionRegistry<B> {
    pub fn new(backend: Arc<B>, style: SurfaceStyle, hook: FailureHook) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            backend,
            sessions: Vec::new(),
            active: None,
            counter: 0,
            style,
            hook,
            events_tx,
        }
    }

    /// Spawn a backend process in `cwd` and register a session for it.
    ///
    /// Nothing is registered unless the spawn and both subscriptions
    /// succeed. On success the new session is active.
    pub async fn create(
        &mut self,
        cwd: &str,
        host: &mut dyn ViewHost,
    ) -> Result<SessionId, MuxError> {
        let id = match self.backend.spawn(cwd).await {
            Ok(id) => id,
            Err(e) => return Err(self.spawn_failed(cwd, e)),
        };
        if self.contains(&id) {
            let e = BackendError::Spawn(format!("backend reissued live id {id}"));
            return Err(self.spawn_failed(cwd, e));
        }

        let subscriptions = self
            .backend
            .subscribe_output(&id)
            .and_then(|output| Ok((output, self.backend.subscribe_exit(&id)?)));
        let (output, exit) = match subscriptions {
            Ok(pair) => pair,
            Err(e) => {
                // The process exists but we cannot hear it; don't leak it.
                self.close_in_background(id);
                return Err(self.spawn_failed(cwd, e));
            }
        };

        self.counter += 1;
        let seq = self.counter;
        let name = format!("Terminal {seq}");

        let surface = RenderSurface::shared(self.style.clone(), Geometry::INITIAL);
        let mut view = host.create_view(&id);
        view.attach();
        let subscription =
            OutputSubscription::spawn(id.clone(), surface.clone(), output, exit, self.hook.clone());
        let transport = Transport::spawn(id.clone(), self.backend.clone(), self.hook.clone());

        self.sessions.push(Session {
            id: id.clone(),
            display_name: name.clone(),
            created_seq: seq,
            surface,
            view,
            subscription,
            transport,
        });
        self.set_active(&id)?;

        tracing::info!(session = %id, name = %name, cwd = %cwd, "session created");
        let _ = self.events_tx.send(SessionEvent::Created {
            id: id.clone(),
            name,
        });
        Ok(id)
    }

    fn spawn_failed(&self, cwd: &str, source: BackendError) -> MuxError {
        self.hook.report(Failure::Spawn {
            cwd: cwd.to_string(),
            reason: source.to_string(),
        });
        MuxError::Spawn {
            cwd: cwd.to_string(),
            source,
        }
    }

    /// Tear down a session and ask the backend to close its process.
    ///
    /// Output and exit listeners are cut before the surface is disposed,
    /// so a late event can never write into a disposed surface. The
    /// backend close is fire-and-forget.
    pub fn remove(&mut self, id: &SessionId) -> Result<RemoveOutcome, RegistryError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        let session = &mut self.sessions[index];
        session.subscription.unsubscribe();
        session.transport.shutdown();
        session.surface.lock().dispose();
        session.view.detach();
        let session = self.sessions.remove(index);

        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        self.close_in_background(session.id.clone());

        tracing::info!(session = %id, "session removed");
        let _ = self.events_tx.send(SessionEvent::Destroyed { id: id.clone() });
        Ok(RemoveOutcome {
            registry_now_empty: self.sessions.is_empty(),
        })
    }

    fn close_in_background(&self, id: SessionId) {
        let backend = self.backend.clone();
        let hook = self.hook.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.close(&id).await {
                hook.report(Failure::Transport {
                    op: TransportOp::Close,
                    session: id,
                    reason: e.to_string(),
                });
            }
        });
    }

    /// Close every remaining backend process, once each, and wait for all
    /// of them to answer. UI state is left untouched.
    ///
    /// Returns how many close requests were issued.
    pub async fn close_all(&self) -> usize {
        let backend = &self.backend;
        let results = futures::future::join_all(self.sessions.iter().map(|s| async move {
            (s.id.clone(), backend.close(&s.id).await)
        }))
        .await;

        let issued = results.len();
        for (id, result) in results {
            if let Err(e) = result {
                self.hook.report(Failure::Transport {
                    op: TransportOp::Close,
                    session: id,
                    reason: e.to_string(),
                });
            }
        }
        tracing::info!(sessions = issued, "closed all sessions");
        issued
    }

    /// Set the session's display name. Surrounding whitespace is trimmed;
    /// a name that is empty after trimming is rejected.
    pub fn rename(&mut self, id: &SessionId, name: &str) -> Result<(), RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        let session = self
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let old_name = std::mem::replace(&mut session.display_name, name.to_string());
        let _ = self.events_tx.send(SessionEvent::Renamed {
            id: id.clone(),
            old_name,
            new_name: name.to_string(),
        });
        Ok(())
    }

    /// Mark `id` active and show only its view.
    pub fn set_active(&mut self, id: &SessionId) -> Result<(), RegistryError> {
        if !self.contains(id) {
            return Err(RegistryError::NotFound(id.clone()));
        }
        for session in &mut self.sessions {
            session.view.set_active(&session.id == id);
        }
        self.active = Some(id.clone());
        Ok(())
    }

    pub fn active(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// The session with the greatest `created_seq`.
    pub fn most_recent(&self) -> Option<&SessionId> {
        self.sessions
            .iter()
            .max_by_key(|s| s.created_seq)
            .map(|s| &s.id)
    }

    /// Give `id` input focus, taking it from every other session.
    pub fn focus(&self, id: &SessionId) {
        for session in &self.sessions {
            let mut surface = session.surface.lock();
            if &session.id == id {
                surface.focus();
            } else {
                surface.blur();
            }
        }
    }

    pub fn blur(&self, id: &SessionId) {
        if let Some(session) = self.get(id) {
            session.surface.lock().blur();
        }
    }

    /// Queue keystrokes or pasted bytes for `id`'s process.
    pub fn send_input(&self, id: &SessionId, data: Bytes) -> Result<(), RegistryError> {
        let session = self
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        session.transport.send_input(data);
        Ok(())
    }

    /// Apply a new theme to all current and future surfaces.
    pub fn set_theme(&mut self, theme: Theme) {
        for session in &self.sessions {
            session.surface.lock().set_theme(theme.clone());
        }
        self.style.theme = theme;
    }

    pub fn style(&self) -> &SurfaceStyle {
        &self.style
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.index_of(id).is_some()
    }

    fn index_of(&self, id: &SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| &s.id == id)
    }

    /// Sessions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Lifecycle events as a stream. A lagging consumer silently skips
    /// what it missed.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> {
        BroadcastStream::new(self.events_tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "session event consumer lagged");
                None
            }
        })
    }
}
