//! Opaque view handles and the host that lays them out.
//!
//! The registry owns one [`ViewHandle`] per session but never looks inside
//! it; only the [`ViewHost`] (a GUI toolkit, or [`HeadlessHost`]) knows what
//! a view really is.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::SessionId;
use crate::tabs::Tab;

/// Measured size of a view in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The visual container a session's surface is drawn into.
pub trait ViewHandle: Send {
    /// Insert into the panel's layout.
    fn attach(&mut self);

    /// Remove from the layout. The handle is not used again afterwards.
    fn detach(&mut self);

    fn is_attached(&self) -> bool;

    /// Show or hide this view within the panel (only the active one shows).
    fn set_active(&mut self, active: bool);

    /// Current laid-out size. Zero while detached or hidden.
    fn measure(&self) -> PixelSize;
}

/// UI toolkit glue: creates views and reflects panel state on screen.
pub trait ViewHost: Send {
    fn create_view(&mut self, id: &SessionId) -> Box<dyn ViewHandle>;

    fn set_panel_visible(&mut self, visible: bool);

    fn set_panel_height(&mut self, height: u32);

    fn render_tabs(&mut self, tabs: &[Tab]);
}

#[derive(Debug, Default)]
struct ViewState {
    attached: bool,
    active: bool,
}

#[derive(Debug, Default)]
struct HostState {
    panel_visible: bool,
    panel_height: u32,
    width: u32,
    tab_bar_height: u32,
    views: HashMap<SessionId, ViewState>,
    tabs: Vec<Tab>,
}

impl HostState {
    fn view_size(&self) -> PixelSize {
        PixelSize {
            width: self.width,
            height: self.panel_height.saturating_sub(self.tab_bar_height),
        }
    }
}

/// A host with no real window: views take the panel's size minus the tab bar.
///
/// Clones share state, so a caller can keep one clone for inspection while
/// the multiplexer owns another.
#[derive(Clone, Default)]
pub struct HeadlessHost {
    state: Arc<Mutex<HostState>>,
}

impl HeadlessHost {
    pub fn new(width: u32, tab_bar_height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                width,
                tab_bar_height,
                ..HostState::default()
            })),
        }
    }

    /// Simulate the surrounding window changing width.
    pub fn set_width(&self, width: u32) {
        self.state.lock().width = width;
    }

    pub fn panel_visible(&self) -> bool {
        self.state.lock().panel_visible
    }

    pub fn panel_height(&self) -> u32 {
        self.state.lock().panel_height
    }

    /// Ids of views currently attached to the layout.
    pub fn attached_views(&self) -> Vec<SessionId> {
        let state = self.state.lock();
        let mut ids: Vec<SessionId> = state
            .views
            .iter()
            .filter(|(_, v)| v.attached)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Tabs as last rendered.
    pub fn tabs(&self) -> Vec<Tab> {
        self.state.lock().tabs.clone()
    }
}

impl ViewHost for HeadlessHost {
    fn create_view(&mut self, id: &SessionId) -> Box<dyn ViewHandle> {
        self.state.lock().views.insert(id.clone(), ViewState::default());
        Box::new(HeadlessView {
            id: id.clone(),
            state: self.state.clone(),
        })
    }

    fn set_panel_visible(&mut self, visible: bool) {
        self.state.lock().panel_visible = visible;
    }

    fn set_panel_height(&mut self, height: u32) {
        self.state.lock().panel_height = height;
    }

    fn render_tabs(&mut self, tabs: &[Tab]) {
        self.state.lock().tabs = tabs.to_vec();
    }
}

struct HeadlessView {
    id: SessionId,
    state: Arc<Mutex<HostState>>,
}

impl HeadlessView {
    fn with_view<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> Option<R> {
        self.state.lock().views.get_mut(&self.id).map(f)
    }
}

impl ViewHandle for HeadlessView {
    fn attach(&mut self) {
        self.with_view(|v| v.attached = true);
    }

    fn detach(&mut self) {
        self.state.lock().views.remove(&self.id);
    }

    fn is_attached(&self) -> bool {
        self.with_view(|v| v.attached).unwrap_or(false)
    }

    fn set_active(&mut self, active: bool) {
        self.with_view(|v| v.active = active);
    }

    fn measure(&self) -> PixelSize {
        let state = self.state.lock();
        let shown = state
            .views
            .get(&self.id)
            .is_some_and(|v| v.attached && v.active);
        if shown && state.panel_visible {
            state.view_size()
        } else {
            PixelSize::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible_host() -> HeadlessHost {
        let mut host = HeadlessHost::new(800, 30);
        host.set_panel_visible(true);
        host.set_panel_height(330);
        host
    }

    #[test]
    fn active_attached_view_measures_panel_minus_tab_bar() {
        let mut host = visible_host();
        let mut view = host.create_view(&SessionId::from("a"));
        view.attach();
        view.set_active(true);
        assert_eq!(view.measure(), PixelSize { width: 800, height: 300 });
    }

    #[test]
    fn detached_or_inactive_view_measures_zero() {
        let mut host = visible_host();
        let mut view = host.create_view(&SessionId::from("a"));
        view.set_active(true);
        assert!(view.measure().is_empty(), "not attached yet");

        view.attach();
        view.set_active(false);
        assert!(view.measure().is_empty(), "inactive view is hidden");
    }

    #[test]
    fn hidden_panel_measures_zero() {
        let mut host = visible_host();
        let mut view = host.create_view(&SessionId::from("a"));
        view.attach();
        view.set_active(true);
        host.set_panel_visible(false);
        assert!(view.measure().is_empty());
    }

    #[test]
    fn detach_forgets_view() {
        let mut host = visible_host();
        let mut view = host.create_view(&SessionId::from("a"));
        view.attach();
        assert_eq!(host.attached_views(), vec![SessionId::from("a")]);
        view.detach();
        assert!(host.attached_views().is_empty());
        assert!(!view.is_attached());
    }
}
