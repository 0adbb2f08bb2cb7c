use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::resize::DragNotify;
use crate::surface::{ColorScheme, FontMetrics, SurfaceStyle, Theme};

/// Top-level multiplexer config, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub panel: PanelConfig,
    pub surface: SurfaceConfig,
}

/// `[panel]` section: geometry of the bottom panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Height used until the user drags the panel to a new one.
    pub default_height: u32,
    pub min_height: u32,
    pub max_height: u32,
    /// Pixels taken by the tab strip above the terminal views.
    pub tab_bar_height: u32,
    /// Panel width for hosts that don't measure a real window.
    pub width: u32,
    pub drag_notify: DragNotify,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            default_height: 300,
            min_height: 100,
            max_height: 800,
            tab_bar_height: 32,
            width: 960,
            drag_notify: DragNotify::default(),
        }
    }
}

impl PanelConfig {
    pub fn clamp_height(&self, height: u32) -> u32 {
        // A misconfigured min > max must not panic `clamp`.
        let max = self.max_height.max(self.min_height);
        height.clamp(self.min_height, max)
    }
}

/// `[surface]` section: how each terminal is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub font_family: String,
    pub font_size: f32,
    /// Cell width as a fraction of the font size.
    pub cell_width_ratio: f32,
    pub line_height: f32,
    pub cursor_blink: bool,
    pub scrollback_limit: usize,
    pub color_scheme: ColorScheme,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        let style = SurfaceStyle::default();
        Self {
            font_family: style.font_family,
            font_size: 13.0,
            cell_width_ratio: 0.6,
            line_height: 1.2,
            cursor_blink: style.cursor_blink,
            scrollback_limit: style.scrollback_limit,
            color_scheme: ColorScheme::default(),
        }
    }
}

impl SurfaceConfig {
    pub fn style(&self) -> SurfaceStyle {
        SurfaceStyle {
            theme: Theme::for_scheme(self.color_scheme),
            font_family: self.font_family.clone(),
            font: FontMetrics::from_font_size(self.font_size, self.cell_width_ratio, self.line_height),
            cursor_blink: self.cursor_blink,
            scrollback_limit: self.scrollback_limit,
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        write_toml(path, self)
    }

    /// `<config dir>/tabterm/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tabterm").join("config.toml"))
    }
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
    }
    let contents = toml::to_string_pretty(value).map_err(ConfigError::SerializeFailed)?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
    Ok(())
}

/// Errors that can occur when loading or saving config and state.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    WriteFailed(PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where the user's chosen panel height survives restarts.
pub trait HeightStore: Send {
    /// Last saved height, if any. Unreadable state counts as none.
    fn load(&self) -> Option<u32>;

    fn save(&mut self, height: u32) -> Result<(), ConfigError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PanelState {
    height: Option<u32>,
}

/// Persists the panel height in a small TOML state file.
#[derive(Debug, Clone)]
pub struct TomlHeightStore {
    path: PathBuf,
}

impl TomlHeightStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<state dir>/tabterm/state.toml`, falling back to the data dir on
    /// platforms without a state dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::state_dir()
            .or_else(dirs::data_dir)
            .map(|d| d.join("tabterm").join("state.toml"))
    }
}

impl HeightStore for TomlHeightStore {
    fn load(&self) -> Option<u32> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match toml::from_str::<PanelState>(&contents) {
            Ok(state) => state.height,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable panel state");
                None
            }
        }
    }

    fn save(&mut self, height: u32) -> Result<(), ConfigError> {
        write_toml(&self.path, &PanelState { height: Some(height) })
    }
}

/// In-memory store. Clones share the saved value.
#[derive(Debug, Clone, Default)]
pub struct MemoryHeightStore {
    height: Arc<Mutex<Option<u32>>>,
}

impl MemoryHeightStore {
    pub fn with_height(height: u32) -> Self {
        Self {
            height: Arc::new(Mutex::new(Some(height))),
        }
    }

    pub fn get(&self) -> Option<u32> {
        *self.height.lock()
    }
}

impl HeightStore for MemoryHeightStore {
    fn load(&self) -> Option<u32> {
        self.get()
    }

    fn save(&mut self, height: u32) -> Result<(), ConfigError> {
        *self.height.lock() = Some(height);
        Ok(())
    }
}
