#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use tabterm::backend::{ExitSignal, OutputStream};
use tabterm::config::{Config, MemoryHeightStore};
use tabterm::surface::FontMetrics;
use tabterm::{
    Backend, BackendError, Failure, FailureHook, HeadlessHost, Multiplexer, MuxOptions, SessionId,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct Channels {
    output_tx: Option<mpsc::UnboundedSender<String>>,
    output_rx: Option<OutputStream>,
    exit_tx: Option<oneshot::Sender<()>>,
    exit_rx: Option<ExitSignal>,
}

#[derive(Default)]
struct State {
    next: u64,
    fail_spawn: bool,
    fail_close: bool,
    fail_resize: bool,
    fail_subscribe: bool,
    reissue: Option<SessionId>,
    live: HashMap<SessionId, Channels>,
    spawn_cwds: Vec<String>,
    closes: Vec<SessionId>,
    resizes: Vec<(SessionId, u16, u16)>,
    inputs: Vec<(SessionId, Bytes)>,
}

/// In-memory backend that records every call and can be told to fail.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.state.lock().fail_spawn = fail;
    }

    pub fn fail_closes(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    pub fn fail_resizes(&self, fail: bool) {
        self.state.lock().fail_resize = fail;
    }

    /// Spawns succeed but the exit subscription is refused.
    pub fn fail_subscribes(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    /// Make the next spawn hand back `id` instead of a fresh one.
    pub fn reissue_next(&self, id: &SessionId) {
        self.state.lock().reissue = Some(id.clone());
    }

    /// Push raw bytes out of `id`'s process, base64-encoded like a real backend.
    pub fn emit(&self, id: &SessionId, data: &[u8]) {
        self.emit_raw(id, base64::engine::general_purpose::STANDARD.encode(data));
    }

    /// Push an already-encoded chunk, verbatim.
    pub fn emit_raw(&self, id: &SessionId, chunk: String) {
        let state = self.state.lock();
        if let Some(tx) = state.live.get(id).and_then(|c| c.output_tx.as_ref()) {
            let _ = tx.send(chunk);
        }
    }

    /// Simulate `id`'s process exiting.
    pub fn exit(&self, id: &SessionId) {
        let mut state = self.state.lock();
        if let Some(tx) = state.live.get_mut(id).and_then(|c| c.exit_tx.take()) {
            let _ = tx.send(());
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().spawn_cwds.len()
    }

    pub fn spawn_cwds(&self) -> Vec<String> {
        self.state.lock().spawn_cwds.clone()
    }

    pub fn closes(&self) -> Vec<SessionId> {
        self.state.lock().closes.clone()
    }

    pub fn resizes(&self) -> Vec<(SessionId, u16, u16)> {
        self.state.lock().resizes.clone()
    }

    pub fn resizes_for(&self, id: &SessionId) -> Vec<(u16, u16)> {
        self.resizes()
            .into_iter()
            .filter(|(rid, ..)| rid == id)
            .map(|(_, rows, cols)| (rows, cols))
            .collect()
    }

    pub fn inputs(&self) -> Vec<(SessionId, Bytes)> {
        self.state.lock().inputs.clone()
    }
}

impl Backend for FakeBackend {
    async fn spawn(&self, cwd: &str) -> Result<SessionId, BackendError> {
        let mut state = self.state.lock();
        if state.fail_spawn {
            return Err(BackendError::Spawn("no more ptys".into()));
        }
        state.spawn_cwds.push(cwd.to_string());
        if let Some(id) = state.reissue.take() {
            return Ok(id);
        }
        state.next += 1;
        let id = SessionId::new(format!("fake-{}", state.next));
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        state.live.insert(
            id.clone(),
            Channels {
                output_tx: Some(output_tx),
                output_rx: Some(output_rx),
                exit_tx: Some(exit_tx),
                exit_rx: Some(exit_rx),
            },
        );
        Ok(id)
    }

    async fn close(&self, id: &SessionId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.closes.push(id.clone());
        if state.fail_close {
            return Err(BackendError::Closed(id.clone()));
        }
        state.live.remove(id);
        Ok(())
    }

    async fn resize(&self, id: &SessionId, rows: u16, cols: u16) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.resizes.push((id.clone(), rows, cols));
        if state.fail_resize {
            return Err(BackendError::UnknownSession(id.clone()));
        }
        Ok(())
    }

    async fn send_input(&self, id: &SessionId, data: Bytes) -> Result<(), BackendError> {
        self.state.lock().inputs.push((id.clone(), data));
        Ok(())
    }

    fn subscribe_output(&self, id: &SessionId) -> Result<OutputStream, BackendError> {
        self.state
            .lock()
            .live
            .get_mut(id)
            .ok_or_else(|| BackendError::UnknownSession(id.clone()))?
            .output_rx
            .take()
            .ok_or_else(|| BackendError::AlreadySubscribed(id.clone()))
    }

    fn subscribe_exit(&self, id: &SessionId) -> Result<ExitSignal, BackendError> {
        let mut state = self.state.lock();
        if state.fail_subscribe {
            return Err(BackendError::UnknownSession(id.clone()));
        }
        state
            .live
            .get_mut(id)
            .ok_or_else(|| BackendError::UnknownSession(id.clone()))?
            .exit_rx
            .take()
            .ok_or_else(|| BackendError::AlreadySubscribed(id.clone()))
    }
}

/// Failure hook that keeps everything it is handed.
#[derive(Clone, Default)]
pub struct RecordingHook {
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl RecordingHook {
    pub fn hook(&self) -> FailureHook {
        let failures = self.failures.clone();
        FailureHook::new(move |f| failures.lock().push(f.clone()))
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }
}

/// Panel width, tab bar height and cell size chosen so geometry is easy to
/// predict: an 800x300 panel with a 20px tab bar fits 100 cols x 17 rows.
pub const WIDTH: u32 = 800;
pub const TAB_BAR: u32 = 20;

/// Everything a multiplexer test needs, wired to a fake backend.
pub struct TestMux {
    pub mux: Multiplexer<FakeBackend, HeadlessHost>,
    pub backend: FakeBackend,
    pub host: HeadlessHost,
    pub hook: RecordingHook,
    pub store: MemoryHeightStore,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.panel.width = WIDTH;
    config.panel.tab_bar_height = TAB_BAR;
    config.surface.font_size = 10.0;
    config.surface.cell_width_ratio = 0.8;
    config.surface.line_height = 1.6;
    config
}

/// Cell size produced by [`test_config`].
pub fn test_font() -> FontMetrics {
    FontMetrics::from_font_size(10.0, 0.8, 1.6)
}

pub fn create_test_mux() -> TestMux {
    create_test_mux_with_config(test_config())
}

pub fn create_test_mux_with_config(config: Config) -> TestMux {
    let backend = FakeBackend::new();
    let host = HeadlessHost::new(config.panel.width, config.panel.tab_bar_height);
    let hook = RecordingHook::default();
    let store = MemoryHeightStore::default();
    let mux = Multiplexer::new(
        Arc::new(backend.clone()),
        host.clone(),
        MuxOptions {
            config,
            height_store: Box::new(store.clone()),
            hook: hook.hook(),
        },
    );
    TestMux {
        mux,
        backend,
        host,
        hook,
        store,
    }
}

impl TestMux {
    /// Full scrollback + screen of `id`'s surface.
    pub fn contents(&self, id: &SessionId) -> String {
        self.mux
            .registry()
            .get(id)
            .map(|s| s.surface().lock().contents())
            .unwrap_or_default()
    }

    pub fn active(&self) -> Option<SessionId> {
        self.mux.registry().active().cloned()
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Give queued fire-and-forget work a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
