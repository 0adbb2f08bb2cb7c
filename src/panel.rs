//! Show/hide and sizing of the panel that holds every session.

use crate::backend::Backend;
use crate::config::{HeightStore, PanelConfig};
use crate::error::MuxError;
use crate::resize::ResizeCoordinator;
use crate::session::SessionRegistry;
use crate::view::ViewHost;

#[derive(Debug, Clone, Copy)]
struct Drag {
    start_y: i32,
    start_height: u32,
}

pub struct PanelController {
    open: bool,
    height: u32,
    config: PanelConfig,
    drag: Option<Drag>,
    store: Box<dyn HeightStore>,
}

impl PanelController {
    /// Starts closed, at the stored height if there is one.
    pub fn new(config: &PanelConfig, store: Box<dyn HeightStore>) -> Self {
        let height = config.clamp_height(store.load().unwrap_or(config.default_height));
        Self {
            open: false,
            height,
            config: config.clone(),
            drag: None,
            store,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Show the panel.
    ///
    /// With no sessions, one is created in `cwd` first; if that fails the
    /// panel stays closed. Otherwise the active session is re-fitted (the
    /// layout may have changed while hidden) and focused.
    pub async fn open<B: Backend>(
        &mut self,
        registry: &mut SessionRegistry<B>,
        resize: &mut ResizeCoordinator,
        host: &mut dyn ViewHost,
        cwd: &str,
    ) -> Result<(), MuxError> {
        if self.open {
            return Ok(());
        }
        if registry.is_empty() {
            let id = registry.create(cwd, host).await?;
            self.show(host);
            resize.schedule_initial(id.clone());
            registry.focus(&id);
        } else {
            self.show(host);
            resize.reveal(registry);
            if let Some(id) = registry.active().cloned() {
                registry.focus(&id);
            }
        }
        tracing::debug!(height = self.height, sessions = registry.len(), "panel opened");
        Ok(())
    }

    fn show(&mut self, host: &mut dyn ViewHost) {
        host.set_panel_height(self.height);
        host.set_panel_visible(true);
        self.open = true;
    }

    /// Hide the panel. Sessions keep running; the active one loses focus
    /// until the panel is shown again.
    pub fn close<B: Backend>(&mut self, registry: &SessionRegistry<B>, host: &mut dyn ViewHost) {
        if !self.open {
            return;
        }
        self.open = false;
        self.drag = None;
        if let Some(id) = registry.active() {
            registry.blur(id);
        }
        host.set_panel_visible(false);
        tracing::debug!("panel closed");
    }

    pub async fn toggle<B: Backend>(
        &mut self,
        registry: &mut SessionRegistry<B>,
        resize: &mut ResizeCoordinator,
        host: &mut dyn ViewHost,
        cwd: &str,
    ) -> Result<(), MuxError> {
        if self.open {
            self.close(registry, host);
            Ok(())
        } else {
            self.open(registry, resize, host, cwd).await
        }
    }

    /// Pointer pressed on the resize handle at screen row `y`.
    pub fn begin_drag(&mut self, y: i32) {
        if !self.open {
            return;
        }
        self.drag = Some(Drag {
            start_y: y,
            start_height: self.height,
        });
    }

    /// Pointer moved to `y`. Dragging up grows the panel.
    ///
    /// Returns the new height, or `None` when no drag is in progress.
    pub fn drag_to<B: Backend>(
        &mut self,
        registry: &SessionRegistry<B>,
        resize: &mut ResizeCoordinator,
        host: &mut dyn ViewHost,
        y: i32,
    ) -> Option<u32> {
        let drag = self.drag?;
        let wanted = i64::from(drag.start_height) + i64::from(drag.start_y) - i64::from(y);
        let wanted = wanted.clamp(0, i64::from(u32::MAX)) as u32;
        self.height = self.config.clamp_height(wanted);
        host.set_panel_height(self.height);
        resize.drag_step(registry);
        Some(self.height)
    }

    /// Pointer released. Persists the height and tells the backend once.
    pub fn end_drag<B: Backend>(
        &mut self,
        registry: &SessionRegistry<B>,
        resize: &mut ResizeCoordinator,
    ) -> Option<u32> {
        self.drag.take()?;
        if let Err(e) = self.store.save(self.height) {
            tracing::warn!(error = %e, "failed to persist panel height");
        }
        resize.drag_release(registry);
        Some(self.height)
    }
}

impl std::fmt::Debug for PanelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelController")
            .field("open", &self.open)
            .field("height", &self.height)
            .field("drag", &self.drag)
            .finish_non_exhaustive()
    }
}
