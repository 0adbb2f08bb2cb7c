//! The multiplexer facade.
//!
//! [`Multiplexer`] owns the registry, the three controllers and the view
//! host, and turns UI events (clicks, drags, keystrokes, frame ticks) into
//! operations on them. Every method takes `&mut self`, so UI events are
//! handled one at a time; per-session I/O runs on tokio tasks behind it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio_stream::Stream;

use crate::backend::{Backend, SessionId};
use crate::config::{Config, HeightStore, MemoryHeightStore};
use crate::error::{FailureHook, MuxError};
use crate::panel::PanelController;
use crate::resize::{Geometry, ResizeCoordinator};
use crate::session::{RemoveOutcome, SessionEvent, SessionRegistry};
use crate::surface::{ColorScheme, Theme};
use crate::tabs::{RenameKey, RenameOutcome, Tab, TabController};
use crate::view::ViewHost;

/// Where new sessions start.
///
/// An explicit folder wins; otherwise the directory containing the current
/// document; otherwise empty, which lets the backend choose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingDir {
    pub folder: Option<PathBuf>,
    pub document: Option<PathBuf>,
}

impl WorkingDir {
    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            folder: Some(path.into()),
            document: None,
        }
    }

    pub fn resolve(&self) -> String {
        if let Some(folder) = &self.folder {
            return folder.to_string_lossy().into_owned();
        }
        self.document
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Construction options for [`Multiplexer`].
pub struct MuxOptions {
    pub config: Config,
    pub height_store: Box<dyn HeightStore>,
    pub hook: FailureHook,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            config: Config::default(),
            height_store: Box::new(MemoryHeightStore::default()),
            hook: FailureHook::default(),
        }
    }
}

/// Per-session part of a [`Snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    pub geometry: Geometry,
    pub exited: bool,
    pub screen: Vec<String>,
}

/// Point-in-time view of the whole multiplexer.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub open: bool,
    pub height: u32,
    pub color_scheme: ColorScheme,
    pub font_family: String,
    pub cursor_blink: bool,
    pub active: Option<SessionId>,
    pub tabs: Vec<Tab>,
    pub sessions: Vec<SessionSnapshot>,
}

pub struct Multiplexer<B: Backend, H: ViewHost> {
    registry: SessionRegistry<B>,
    resize: ResizeCoordinator,
    tabs: TabController,
    panel: PanelController,
    host: H,
    working_dir: WorkingDir,
    color_scheme: ColorScheme,
}

impl<B: Backend, H: ViewHost> Multiplexer<B, H> {
    pub fn new(backend: Arc<B>, host: H, options: MuxOptions) -> Self {
        let MuxOptions {
            config,
            height_store,
            hook,
        } = options;
        Self {
            registry: SessionRegistry::new(backend, config.surface.style(), hook),
            resize: ResizeCoordinator::new(config.panel.drag_notify),
            tabs: TabController::new(),
            panel: PanelController::new(&config.panel, height_store),
            host,
            working_dir: WorkingDir::default(),
            color_scheme: config.surface.color_scheme,
        }
    }

    // ── Panel ──────────────────────────────────────────────────────

    /// Show the panel, creating the first session if there is none.
    pub async fn open_panel(&mut self) -> Result<(), MuxError> {
        let cwd = self.working_dir.resolve();
        let result = self
            .panel
            .open(&mut self.registry, &mut self.resize, &mut self.host, &cwd)
            .await;
        self.refresh_tabs();
        result
    }

    pub fn close_panel(&mut self) {
        self.panel.close(&self.registry, &mut self.host);
    }

    pub async fn toggle_panel(&mut self) -> Result<(), MuxError> {
        if self.panel.is_open() {
            self.close_panel();
            Ok(())
        } else {
            self.open_panel().await
        }
    }

    // ── Tabs ───────────────────────────────────────────────────────

    /// The "+" button: one more session, made active and focused.
    pub async fn add_session(&mut self) -> Result<SessionId, MuxError> {
        let cwd = self.working_dir.resolve();
        let id = self.registry.create(&cwd, &mut self.host).await?;
        self.resize.schedule_initial(id.clone());
        self.registry.focus(&id);
        self.refresh_tabs();
        Ok(id)
    }

    pub fn select_tab(&mut self, id: &SessionId) -> Result<bool, MuxError> {
        let changed = self.tabs.select(&mut self.registry, &mut self.resize, id)?;
        self.refresh_tabs();
        Ok(changed)
    }

    pub fn close_tab(&mut self, id: &SessionId) -> Result<RemoveOutcome, MuxError> {
        let outcome = self.tabs.close(
            &mut self.registry,
            &mut self.resize,
            &mut self.panel,
            &mut self.host,
            id,
        )?;
        self.refresh_tabs();
        Ok(outcome)
    }

    pub fn begin_rename(&mut self, id: &SessionId) -> Result<(), MuxError> {
        self.tabs.begin_rename(&mut self.registry, id)?;
        self.refresh_tabs();
        Ok(())
    }

    pub fn edit_rename(&mut self, text: &str) -> bool {
        let editing = self.tabs.edit(text);
        if editing {
            self.refresh_tabs();
        }
        editing
    }

    pub fn rename_key(&mut self, key: RenameKey) -> RenameOutcome {
        let outcome = self.tabs.key(&mut self.registry, key);
        self.refresh_tabs();
        outcome
    }

    pub fn blur_rename(&mut self) -> RenameOutcome {
        let outcome = self.tabs.blur(&mut self.registry);
        self.refresh_tabs();
        outcome
    }

    // ── Resize ─────────────────────────────────────────────────────

    pub fn begin_drag(&mut self, y: i32) {
        self.panel.begin_drag(y);
    }

    pub fn drag_to(&mut self, y: i32) -> Option<u32> {
        self.panel
            .drag_to(&self.registry, &mut self.resize, &mut self.host, y)
    }

    pub fn end_drag(&mut self) -> Option<u32> {
        self.panel.end_drag(&self.registry, &mut self.resize)
    }

    /// Next animation frame: run fits deferred until views were laid out.
    pub fn on_frame(&mut self) {
        self.resize.on_frame(&self.registry);
    }

    /// The window around the panel changed size.
    pub fn on_container_resize(&mut self) -> Option<Geometry> {
        self.resize
            .container_resized(&self.registry, self.panel.is_open())
    }

    // ── Input & environment ────────────────────────────────────────

    /// Forward keystrokes to the active session. Returns `false` when
    /// nothing has focus to receive them: no session, a hidden panel, or
    /// an unfocused surface.
    pub fn send_input(&mut self, data: impl Into<Bytes>) -> bool {
        if !self.panel.is_open() {
            return false;
        }
        let Some(session) = self.registry.active().and_then(|id| self.registry.get(id)) else {
            return false;
        };
        if !session.surface().lock().is_focused() {
            return false;
        }
        let id = session.id().clone();
        self.registry.send_input(&id, data.into()).is_ok()
    }

    /// Affects sessions created from now on; running ones keep their cwd.
    pub fn set_working_dir(&mut self, dir: WorkingDir) {
        self.working_dir = dir;
    }

    /// Re-theme every session, including ones created later.
    pub fn set_color_scheme(&mut self, scheme: ColorScheme) {
        self.color_scheme = scheme;
        self.registry.set_theme(Theme::for_scheme(scheme));
    }

    pub fn color_scheme(&self) -> ColorScheme {
        self.color_scheme
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        let sessions = self
            .registry
            .iter()
            .map(|s| {
                let surface = s.surface().lock();
                SessionSnapshot {
                    id: s.id().clone(),
                    name: s.display_name().to_string(),
                    geometry: surface.geometry(),
                    exited: surface.has_exited(),
                    screen: surface.screen_lines(),
                }
            })
            .collect();
        let style = self.registry.style();
        Snapshot {
            open: self.panel.is_open(),
            height: self.panel.height(),
            color_scheme: self.color_scheme,
            font_family: style.font_family.clone(),
            cursor_blink: style.cursor_blink,
            active: self.registry.active().cloned(),
            tabs: self.tabs.tabs(&self.registry),
            sessions,
        }
    }

    pub fn events(&self) -> impl Stream<Item = SessionEvent> {
        self.registry.events()
    }

    pub fn registry(&self) -> &SessionRegistry<B> {
        &self.registry
    }

    pub fn resize(&self) -> &ResizeCoordinator {
        &self.resize
    }

    pub fn panel(&self) -> &PanelController {
        &self.panel
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.tabs.tabs(&self.registry)
    }

    /// Close every backend process and wait for the answers. Call once,
    /// when the embedding window goes away.
    pub async fn teardown(self) -> usize {
        let closed = self.registry.close_all().await;
        tracing::info!(sessions = closed, "multiplexer torn down");
        closed
    }

    fn refresh_tabs(&mut self) {
        let tabs = self.tabs.tabs(&self.registry);
        self.host.render_tabs(&tabs);
    }
}
