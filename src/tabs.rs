//! Tab strip: ordering, selection, inline rename and close.

use serde::Serialize;

use crate::backend::{Backend, SessionId};
use crate::panel::PanelController;
use crate::resize::ResizeCoordinator;
use crate::session::{RegistryError, RemoveOutcome, SessionRegistry};
use crate::view::ViewHost;

/// One entry in the tab strip, as handed to the view host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tab {
    pub id: SessionId,
    /// The session's name, or the in-progress draft while renaming.
    pub label: String,
    pub active: bool,
    pub editing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameKey {
    Enter,
    Escape,
}

/// An inline rename in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameEdit {
    pub id: SessionId,
    pub draft: String,
    /// The whole draft is selected, as it is right after the edit begins.
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Committed(String),
    /// The label went back to this, the unchanged name.
    Reverted(String),
    NotEditing,
}

#[derive(Debug, Default)]
pub struct TabController {
    editing: Option<RenameEdit>,
}

impl TabController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tabs in creation order.
    pub fn tabs<B: Backend>(&self, registry: &SessionRegistry<B>) -> Vec<Tab> {
        let active = registry.active();
        registry
            .iter()
            .map(|s| {
                let edit = self.editing.as_ref().filter(|e| &e.id == s.id());
                Tab {
                    id: s.id().clone(),
                    label: edit.map_or_else(|| s.display_name().to_string(), |e| e.draft.clone()),
                    active: active == Some(s.id()),
                    editing: edit.is_some(),
                }
            })
            .collect()
    }

    /// Make `id` the active tab. Returns `false` if it already was.
    pub fn select<B: Backend>(
        &mut self,
        registry: &mut SessionRegistry<B>,
        resize: &mut ResizeCoordinator,
        id: &SessionId,
    ) -> Result<bool, RegistryError> {
        if !registry.contains(id) {
            return Err(RegistryError::NotFound(id.clone()));
        }
        if registry.active() == Some(id) {
            return Ok(false);
        }
        if let Some(previous) = registry.active().cloned() {
            registry.blur(&previous);
        }
        registry.set_active(id)?;
        resize.refit(registry, id, true);
        registry.focus(id);
        tracing::debug!(session = %id, "tab selected");
        Ok(true)
    }

    pub fn editing(&self) -> Option<&RenameEdit> {
        self.editing.as_ref()
    }

    /// Start renaming `id`, with its current name as the selected draft.
    ///
    /// An edit already running on another tab is finished first, as if
    /// its input had lost focus.
    pub fn begin_rename<B: Backend>(
        &mut self,
        registry: &mut SessionRegistry<B>,
        id: &SessionId,
    ) -> Result<(), RegistryError> {
        let name = registry
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?
            .display_name()
            .to_string();
        if self.editing.as_ref().is_some_and(|e| &e.id != id) {
            self.blur(registry);
        }
        self.editing = Some(RenameEdit {
            id: id.clone(),
            draft: name,
            selected: true,
        });
        Ok(())
    }

    /// Replace the draft. Returns `false` when no rename is in progress.
    pub fn edit(&mut self, text: &str) -> bool {
        match &mut self.editing {
            Some(edit) => {
                edit.draft = text.to_string();
                edit.selected = false;
                true
            }
            None => false,
        }
    }

    pub fn key<B: Backend>(
        &mut self,
        registry: &mut SessionRegistry<B>,
        key: RenameKey,
    ) -> RenameOutcome {
        match key {
            RenameKey::Enter => self.finish(registry, true),
            RenameKey::Escape => self.finish(registry, false),
        }
    }

    /// The rename input lost focus: same as Enter.
    pub fn blur<B: Backend>(&mut self, registry: &mut SessionRegistry<B>) -> RenameOutcome {
        self.finish(registry, true)
    }

    fn finish<B: Backend>(&mut self, registry: &mut SessionRegistry<B>, commit: bool) -> RenameOutcome {
        let Some(edit) = self.editing.take() else {
            return RenameOutcome::NotEditing;
        };
        let Some(current) = registry.get(&edit.id).map(|s| s.display_name().to_string()) else {
            return RenameOutcome::NotEditing;
        };
        if !commit {
            return RenameOutcome::Reverted(current);
        }
        match registry.rename(&edit.id, &edit.draft) {
            Ok(()) => {
                let name = edit.draft.trim().to_string();
                tracing::debug!(session = %edit.id, name = %name, "tab renamed");
                RenameOutcome::Committed(name)
            }
            Err(_) => RenameOutcome::Reverted(current),
        }
    }

    /// Close `id`'s tab and destroy its session.
    ///
    /// Closing the last tab hides the panel. Closing the active tab moves
    /// focus to the most recently created survivor.
    pub fn close<B: Backend>(
        &mut self,
        registry: &mut SessionRegistry<B>,
        resize: &mut ResizeCoordinator,
        panel: &mut PanelController,
        host: &mut dyn ViewHost,
        id: &SessionId,
    ) -> Result<RemoveOutcome, RegistryError> {
        let was_active = registry.active() == Some(id);
        let outcome = registry.remove(id)?;
        if self.editing.as_ref().is_some_and(|e| &e.id == id) {
            self.editing = None;
        }

        if outcome.registry_now_empty {
            panel.close(registry, host);
        } else if was_active {
            if let Some(next) = registry.most_recent().cloned() {
                registry.set_active(&next)?;
                resize.refit(registry, &next, true);
                registry.focus(&next);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::config::{MemoryHeightStore, PanelConfig};
    use crate::error::FailureHook;
    use crate::resize::DragNotify;
    use crate::surface::SurfaceStyle;
    use crate::view::HeadlessHost;
    use std::sync::Arc;

    struct Rig {
        backend: FakeBackend,
        host: HeadlessHost,
        registry: SessionRegistry<FakeBackend>,
        resize: ResizeCoordinator,
        panel: PanelController,
        tabs: TabController,
    }

    impl Rig {
        async fn new() -> Self {
            let backend = FakeBackend::default();
            let mut r = Rig {
                registry: SessionRegistry::new(
                    Arc::new(backend.clone()),
                    SurfaceStyle::default(),
                    FailureHook::default(),
                ),
                backend,
                host: HeadlessHost::new(800, 20),
                resize: ResizeCoordinator::new(DragNotify::OnRelease),
                panel: PanelController::new(&PanelConfig::default(), Box::new(MemoryHeightStore::default())),
                tabs: TabController::new(),
            };
            r.panel
                .open(&mut r.registry, &mut r.resize, &mut r.host, "")
                .await
                .unwrap();
            r
        }

        async fn add(&mut self) -> SessionId {
            self.registry.create("", &mut self.host).await.unwrap()
        }

        fn close(&mut self, id: &SessionId) -> Result<RemoveOutcome, RegistryError> {
            self.tabs
                .close(&mut self.registry, &mut self.resize, &mut self.panel, &mut self.host, id)
        }

        fn labels(&self) -> Vec<String> {
            self.tabs.tabs(&self.registry).into_iter().map(|t| t.label).collect()
        }
    }

    #[tokio::test]
    async fn tabs_follow_creation_order() {
        let mut r = Rig::new().await;
        let second = r.add().await;

        let tabs = r.tabs.tabs(&r.registry);
        assert_eq!(r.labels(), vec!["Terminal 1", "Terminal 2"]);
        assert!(!tabs[0].active);
        assert!(tabs[1].active);
        assert_eq!(tabs[1].id, second);
    }

    #[tokio::test]
    async fn select_switches_focus_and_refits() {
        let mut r = Rig::new().await;
        let first = r.registry.ids()[0].clone();
        let second = r.add().await;
        r.registry.focus(&second);
        let fits = r.resize.fit_count();

        assert!(r.tabs.select(&mut r.registry, &mut r.resize, &first).unwrap());

        assert_eq!(r.registry.active(), Some(&first));
        assert_eq!(r.resize.fit_count(), fits + 1);
        assert!(r.registry.get(&first).unwrap().surface().lock().is_focused());
        assert!(!r.registry.get(&second).unwrap().surface().lock().is_focused());
    }

    #[tokio::test]
    async fn selecting_active_tab_is_a_no_op() {
        let mut r = Rig::new().await;
        let id = r.registry.ids()[0].clone();
        let fits = r.resize.fit_count();

        assert!(!r.tabs.select(&mut r.registry, &mut r.resize, &id).unwrap());
        assert_eq!(r.resize.fit_count(), fits);
    }

    #[tokio::test]
    async fn select_unknown_is_not_found() {
        let mut r = Rig::new().await;
        let err = r
            .tabs
            .select(&mut r.registry, &mut r.resize, &SessionId::from("ghost"))
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound(SessionId::from("ghost")));
    }

    #[tokio::test]
    async fn rename_commit_and_revert() {
        let mut r = Rig::new().await;
        let id = r.registry.ids()[0].clone();

        r.tabs.begin_rename(&mut r.registry, &id).unwrap();
        let edit = r.tabs.editing().unwrap();
        assert_eq!(edit.draft, "Terminal 1");
        assert!(edit.selected);

        r.tabs.edit("  build  ");
        assert_eq!(r.labels(), vec!["  build  "], "label shows the draft while editing");
        assert_eq!(
            r.tabs.key(&mut r.registry, RenameKey::Enter),
            RenameOutcome::Committed("build".into())
        );
        assert_eq!(r.registry.get(&id).unwrap().display_name(), "build");

        r.tabs.begin_rename(&mut r.registry, &id).unwrap();
        r.tabs.edit("   ");
        assert_eq!(r.tabs.blur(&mut r.registry), RenameOutcome::Reverted("build".into()));
        assert_eq!(r.labels(), vec!["build"]);

        r.tabs.begin_rename(&mut r.registry, &id).unwrap();
        r.tabs.edit("other");
        assert_eq!(
            r.tabs.key(&mut r.registry, RenameKey::Escape),
            RenameOutcome::Reverted("build".into())
        );
        assert_eq!(r.registry.get(&id).unwrap().display_name(), "build");
    }

    #[tokio::test]
    async fn starting_second_rename_commits_first() {
        let mut r = Rig::new().await;
        let first = r.registry.ids()[0].clone();
        let second = r.add().await;

        r.tabs.begin_rename(&mut r.registry, &first).unwrap();
        r.tabs.edit("logs");
        r.tabs.begin_rename(&mut r.registry, &second).unwrap();

        assert_eq!(r.registry.get(&first).unwrap().display_name(), "logs");
        assert_eq!(r.tabs.editing().unwrap().id, second);
    }

    #[tokio::test]
    async fn finishing_without_edit_is_not_editing() {
        let mut r = Rig::new().await;
        assert_eq!(r.tabs.blur(&mut r.registry), RenameOutcome::NotEditing);
        assert!(!r.tabs.edit("x"));
    }

    #[tokio::test]
    async fn closing_active_falls_back_to_newest_survivor() {
        let mut r = Rig::new().await;
        let first = r.registry.ids()[0].clone();
        let second = r.add().await;
        let third = r.add().await;
        r.tabs.select(&mut r.registry, &mut r.resize, &second).unwrap();

        let outcome = r.close(&second).unwrap();

        assert!(!outcome.registry_now_empty);
        assert_eq!(r.registry.active(), Some(&third));
        assert!(r.registry.get(&third).unwrap().surface().lock().is_focused());
        assert_eq!(r.registry.ids(), vec![first, third]);
        assert!(r.panel.is_open());
    }

    #[tokio::test]
    async fn closing_background_tab_keeps_active() {
        let mut r = Rig::new().await;
        let first = r.registry.ids()[0].clone();
        let second = r.add().await;

        r.close(&first).unwrap();
        assert_eq!(r.registry.active(), Some(&second));
    }

    #[tokio::test]
    async fn closing_last_tab_hides_panel() {
        let mut r = Rig::new().await;
        let id = r.registry.ids()[0].clone();

        let outcome = r.close(&id).unwrap();

        assert!(outcome.registry_now_empty);
        assert!(!r.panel.is_open());
        assert!(!r.host.panel_visible());
        assert!(r.registry.active().is_none());
        assert_eq!(r.close(&id), Err(RegistryError::NotFound(id)));
    }

    #[tokio::test]
    async fn closing_tab_under_rename_drops_edit() {
        let mut r = Rig::new().await;
        let id = r.registry.ids()[0].clone();
        r.add().await;
        r.tabs.begin_rename(&mut r.registry, &id).unwrap();

        r.close(&id).unwrap();
        assert!(r.tabs.editing().is_none());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(r.backend.closes(), vec![id]);
    }
}
