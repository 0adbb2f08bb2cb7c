use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{Backend, BackendError, ExitSignal, OutputStream, SessionId};

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] anyhow::Error),

    #[error("failed to spawn command: {0}")]
    SpawnCommand(#[source] anyhow::Error),

    #[error("failed to clone reader: {0}")]
    CloneReader(#[source] anyhow::Error),

    #[error("failed to take writer: {0}")]
    TakeWriter(#[source] anyhow::Error),

    #[error("failed to resize pty: {0}")]
    Resize(#[source] anyhow::Error),

    #[error("failed to write to pty: {0}")]
    Write(#[from] std::io::Error),
}

/// Geometry every new pseudo-terminal starts with, before the first fit.
pub const INITIAL_ROWS: u16 = 24;
pub const INITIAL_COLS: u16 = 80;

/// An open pseudo-terminal with a child attached to its slave side.
pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
}

impl Pty {
    /// Build the command for an interactive login shell.
    ///
    /// Uses `shell` if given, else `$SHELL`, else `/bin/sh`. An empty `cwd`
    /// leaves the working directory to the shell.
    pub fn login_shell(shell: Option<&str>, cwd: &str) -> CommandBuilder {
        let shell = shell
            .map(str::to_string)
            .unwrap_or_else(|| std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()));
        let mut cmd = CommandBuilder::new(&shell);
        cmd.arg("-l");
        if !cwd.is_empty() {
            cmd.cwd(cwd);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd
    }

    pub fn spawn(rows: u16, cols: u16, cmd: CommandBuilder) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::OpenPty)?;

        let child = pair.slave.spawn_command(cmd).map_err(PtyError::SpawnCommand)?;
        // The master side handles all I/O; holding the slave open would
        // keep the reader from ever seeing EOF.
        drop(pair.slave);

        Ok(Self {
            master: pair.master,
            child: Some(child),
        })
    }

    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master.try_clone_reader().map_err(PtyError::CloneReader)
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master.take_writer().map_err(PtyError::TakeWriter)
    }

    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Resize)
    }
}

struct PtyEntry {
    pty: Pty,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    output_rx: Option<OutputStream>,
    exit_rx: Option<ExitSignal>,
}

/// [`Backend`] that runs each session as a login shell on a local pseudo-terminal.
#[derive(Clone, Default)]
pub struct PtyBackend {
    sessions: Arc<Mutex<HashMap<SessionId, PtyEntry>>>,
    shell: Option<String>,
}

impl PtyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `shell` instead of `$SHELL` for new sessions.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            sessions: Arc::default(),
            shell: Some(shell.into()),
        }
    }

    /// Number of processes this backend still holds open.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start(shell: Option<&str>, cwd: &str) -> Result<PtyEntry, PtyError> {
        let cmd = Pty::login_shell(shell, cwd);
        let mut pty = Pty::spawn(INITIAL_ROWS, INITIAL_COLS, cmd)?;
        let reader = pty.take_reader()?;
        let writer = pty.take_writer()?;
        let mut child = pty
            .take_child()
            .ok_or_else(|| PtyError::SpawnCommand(anyhow::anyhow!("child handle missing")))?;
        let killer = child.clone_killer();

        let (output_tx, output_rx) = mpsc::unbounded_channel::<String>();
        let (exit_tx, exit_rx) = oneshot::channel::<()>();

        // Reaper: keeps the child from lingering as a zombie once it exits.
        tokio::task::spawn_blocking(move || match child.wait() {
            Ok(status) => tracing::debug!(?status, "session child exited"),
            Err(e) => tracing::error!(?e, "error waiting for session child"),
        });

        // Reader: output is base64-encoded so arbitrary bytes survive the
        // string channel. Exit fires only after the last chunk is queued.
        tokio::task::spawn_blocking(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut reader = reader;
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let encoded = base64::engine::general_purpose::STANDARD.encode(&buf[..n]);
                            if output_tx.send(encoded).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            }));
            if let Err(e) = result {
                tracing::error!("PTY reader task panicked: {:?}", e);
            }
            let _ = exit_tx.send(());
        });

        Ok(PtyEntry {
            pty,
            writer: Arc::new(Mutex::new(writer)),
            killer,
            output_rx: Some(output_rx),
            exit_rx: Some(exit_rx),
        })
    }
}

impl Backend for PtyBackend {
    async fn spawn(&self, cwd: &str) -> Result<SessionId, BackendError> {
        let shell = self.shell.clone();
        let cwd = cwd.to_string();
        let entry = tokio::task::spawn_blocking(move || Self::start(shell.as_deref(), &cwd))
            .await
            .map_err(|e| BackendError::Spawn(e.to_string()))??;

        let id = SessionId::new(format!("term-{}", uuid::Uuid::new_v4()));
        self.sessions.lock().insert(id.clone(), entry);
        tracing::debug!(session = %id, "pty session started");
        Ok(id)
    }

    async fn close(&self, id: &SessionId) -> Result<(), BackendError> {
        // Unknown ids are fine: the process may already be gone.
        let Some(mut entry) = self.sessions.lock().remove(id) else {
            return Ok(());
        };
        if let Err(e) = entry.killer.kill() {
            tracing::debug!(session = %id, ?e, "kill failed, child likely exited already");
        }
        drop(entry);
        Ok(())
    }

    async fn resize(&self, id: &SessionId, rows: u16, cols: u16) -> Result<(), BackendError> {
        let sessions = self.sessions.lock();
        let entry = sessions
            .get(id)
            .ok_or_else(|| BackendError::UnknownSession(id.clone()))?;
        entry.pty.resize(rows, cols)?;
        Ok(())
    }

    async fn send_input(&self, id: &SessionId, data: Bytes) -> Result<(), BackendError> {
        let writer = self
            .sessions
            .lock()
            .get(id)
            .map(|e| e.writer.clone())
            .ok_or_else(|| BackendError::UnknownSession(id.clone()))?;
        tokio::task::spawn_blocking(move || -> Result<(), PtyError> {
            let mut writer = writer.lock();
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|_| BackendError::Closed(id.clone()))??;
        Ok(())
    }

    fn subscribe_output(&self, id: &SessionId) -> Result<OutputStream, BackendError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| BackendError::UnknownSession(id.clone()))?;
        entry
            .output_rx
            .take()
            .ok_or_else(|| BackendError::AlreadySubscribed(id.clone()))
    }

    fn subscribe_exit(&self, id: &SessionId) -> Result<ExitSignal, BackendError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| BackendError::UnknownSession(id.clone()))?;
        entry
            .exit_rx
            .take()
            .ok_or_else(|| BackendError::AlreadySubscribed(id.clone()))
    }
}
