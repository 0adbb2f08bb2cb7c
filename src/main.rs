//! tabterm - drive a headless tabbed terminal panel from the command line.
//!
//! Opens the panel (which spawns the first shell), optionally adds more
//! tabs, types the given commands into the active tab, waits for output to
//! settle, then prints every tab's screen and closes all sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser as ClapParser;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabterm::config::{HeightStore, MemoryHeightStore, TomlHeightStore};
use tabterm::{Config, HeadlessHost, Multiplexer, MuxOptions, PtyBackend, WorkingDir};

/// tabterm - tabbed terminal sessions in one panel
#[derive(ClapParser, Debug)]
#[command(name = "tabterm", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/tabterm/config.toml)
    #[arg(long, env = "TABTERM_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory for new sessions
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Shell to spawn (overrides $SHELL)
    #[arg(long)]
    shell: Option<String>,

    /// Number of tabs to open
    #[arg(long, default_value_t = 1)]
    sessions: usize,

    /// Command line to type into the active tab (repeatable)
    #[arg(short = 'c')]
    commands: Vec<String>,

    /// How long to let output settle before printing, in milliseconds
    #[arg(long, default_value_t = 500)]
    wait_ms: u64,

    /// Print a JSON snapshot instead of plain screens
    #[arg(long)]
    json: bool,

    /// Keep the panel height in memory instead of the state file
    #[arg(long)]
    no_state: bool,
}

/// Initialize tracing with stderr output, so stdout carries only screens.
fn init_tracing_stderr() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tabterm=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let Some(path) = path.or_else(Config::default_path) else {
        return Ok(Config::default());
    };
    let config = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    if config.is_none() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
    }
    Ok(config.unwrap_or_default())
}

fn height_store(in_memory: bool) -> Box<dyn HeightStore> {
    match TomlHeightStore::default_path() {
        Some(path) if !in_memory => Box::new(TomlHeightStore::new(path)),
        _ => Box::new(MemoryHeightStore::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = load_config(cli.config)?;
    let backend = match cli.shell {
        Some(shell) => PtyBackend::with_shell(shell),
        None => PtyBackend::new(),
    };
    let host = HeadlessHost::new(config.panel.width, config.panel.tab_bar_height);
    let mut mux = Multiplexer::new(
        Arc::new(backend),
        host,
        MuxOptions {
            config,
            height_store: height_store(cli.no_state),
            ..MuxOptions::default()
        },
    );

    let mut events = Box::pin(mux.events());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            tracing::debug!(?event, "session event");
        }
    });

    if let Some(cwd) = cli.cwd {
        mux.set_working_dir(WorkingDir::folder(cwd));
    }

    mux.open_panel().await.context("opening panel")?;
    for _ in 1..cli.sessions {
        mux.add_session().await.context("adding session")?;
    }
    mux.on_frame();

    for command in &cli.commands {
        if !mux.send_input(format!("{command}\r")) {
            anyhow::bail!("no active session to receive input");
        }
    }
    tokio::time::sleep(Duration::from_millis(cli.wait_ms)).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&mux.snapshot())?);
    } else {
        for session in mux.snapshot().sessions {
            println!("── {} ({}) ──", session.name, session.id);
            let mut screen = session.screen;
            while screen.last().is_some_and(|l| l.is_empty()) {
                screen.pop();
            }
            for line in screen {
                println!("{line}");
            }
        }
    }

    mux.teardown().await;
    Ok(())
}
