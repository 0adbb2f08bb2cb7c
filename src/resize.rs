//! Keeps the backend's terminal geometry in step with the active session's
//! rendered size.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, SessionId};
use crate::session::SessionRegistry;
use crate::surface::FontMetrics;
use crate::view::PixelSize;

/// Character-grid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    /// Size a surface starts at, matching the backend's initial pty size.
    pub const INITIAL: Geometry = Geometry {
        rows: crate::pty::INITIAL_ROWS,
        cols: crate::pty::INITIAL_COLS,
    };

    const MIN_COLS: u16 = 2;
    const MIN_ROWS: u16 = 1;

    /// Grid that fits in `size`, or `None` when there is nothing to measure.
    pub fn fit(size: PixelSize, font: FontMetrics) -> Option<Self> {
        if size.is_empty() || font.cell_width <= 0.0 || font.cell_height <= 0.0 {
            return None;
        }
        let cols = (size.width as f32 / font.cell_width).floor() as u32;
        let rows = (size.height as f32 / font.cell_height).floor() as u32;
        Some(Self {
            rows: clamp_u16(rows).max(Self::MIN_ROWS),
            cols: clamp_u16(cols).max(Self::MIN_COLS),
        })
    }
}

fn clamp_u16(v: u32) -> u16 {
    v.min(u16::MAX as u32) as u16
}

/// When the backend hears about geometry during a panel-height drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragNotify {
    /// Re-fit locally while dragging; notify once on release.
    #[default]
    OnRelease,
    /// Also notify on every drag step.
    Live,
}

pub struct ResizeCoordinator {
    /// Sessions awaiting their first fit on the next frame.
    pending_initial: Vec<SessionId>,
    drag_notify: DragNotify,
    fits: u64,
}

impl ResizeCoordinator {
    pub fn new(drag_notify: DragNotify) -> Self {
        Self {
            pending_initial: Vec::new(),
            drag_notify,
            fits: 0,
        }
    }

    /// Defer the first fit of a freshly attached view to the next frame.
    pub fn schedule_initial(&mut self, id: SessionId) {
        if !self.pending_initial.contains(&id) {
            self.pending_initial.push(id);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_initial.is_empty()
    }

    /// Run the deferred initial fit of the active session.
    ///
    /// Pending sessions that were removed or pushed into the background in
    /// the meantime are dropped; they get fitted when next selected.
    pub fn on_frame<B: Backend>(&mut self, registry: &SessionRegistry<B>) {
        for id in std::mem::take(&mut self.pending_initial) {
            if registry.active() == Some(&id) {
                self.refit(registry, &id, true);
            }
        }
    }

    /// Measure `id`'s view, resize its surface, and optionally tell the backend.
    ///
    /// Returns `None` (and does nothing) when the view has no measurable size.
    pub fn refit<B: Backend>(
        &mut self,
        registry: &SessionRegistry<B>,
        id: &SessionId,
        notify: bool,
    ) -> Option<Geometry> {
        let session = registry.get(id)?;
        let font = session.surface().lock().style().font;
        let Some(geometry) = Geometry::fit(session.view().measure(), font) else {
            tracing::debug!(session = %id, "skipping fit of unmeasurable view");
            return None;
        };
        if let Err(e) = session.surface().lock().resize(geometry) {
            tracing::debug!(session = %id, ?e, "fit on disposed surface");
            return None;
        }
        self.fits += 1;
        if notify {
            session.transport().resize(geometry);
        }
        Some(geometry)
    }

    pub fn refit_active<B: Backend>(
        &mut self,
        registry: &SessionRegistry<B>,
        notify: bool,
    ) -> Option<Geometry> {
        let id = registry.active()?.clone();
        self.refit(registry, &id, notify)
    }

    /// Panel revealed after being hidden: stale layout, always re-fit.
    pub fn reveal<B: Backend>(&mut self, registry: &SessionRegistry<B>) -> Option<Geometry> {
        let id = registry.active()?.clone();
        let geometry = self.refit(registry, &id, true);
        if geometry.is_some() {
            self.pending_initial.retain(|p| p != &id);
        }
        geometry
    }

    pub fn drag_step<B: Backend>(&mut self, registry: &SessionRegistry<B>) -> Option<Geometry> {
        self.refit_active(registry, self.drag_notify == DragNotify::Live)
    }

    pub fn drag_release<B: Backend>(&mut self, registry: &SessionRegistry<B>) -> Option<Geometry> {
        self.refit_active(registry, true)
    }

    /// Surrounding layout changed size. Only matters while the panel shows.
    pub fn container_resized<B: Backend>(
        &mut self,
        registry: &SessionRegistry<B>,
        panel_open: bool,
    ) -> Option<Geometry> {
        if !panel_open {
            return None;
        }
        self.refit_active(registry, true)
    }

    /// Number of fits performed so far.
    pub fn fit_count(&self) -> u64 {
        self.fits
    }
}
