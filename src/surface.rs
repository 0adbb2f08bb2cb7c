//! Per-session rendering surface.
//!
//! Wraps an `avt` virtual terminal: escape-sequence interpretation and the
//! character grid live there. This module adds the pieces the multiplexer
//! needs around it: disposal, focus, theme, and reassembly of UTF-8
//! sequences that straddle output chunks.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resize::Geometry;

/// Written into a session's buffer when its process exits.
pub const EXIT_MARKER: &str = "\r\n\x1b[90m[Process exited]\x1b[0m\r\n";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("rendering surface has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Dark,
    Light,
}

/// Terminal color palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Theme {
    pub background: &'static str,
    pub foreground: &'static str,
    pub cursor: &'static str,
    pub selection: &'static str,
    /// ANSI colors 0-15 (normal then bright).
    pub ansi: [&'static str; 16],
}

impl Theme {
    pub fn for_scheme(scheme: ColorScheme) -> Self {
        match scheme {
            ColorScheme::Dark => Self::dark(),
            ColorScheme::Light => Self::light(),
        }
    }

    pub fn dark() -> Self {
        Self {
            background: "#0d1117",
            foreground: "#e6edf3",
            cursor: "#e6edf3",
            selection: "rgba(88, 166, 255, 0.3)",
            ansi: [
                "#484f58", "#ff7b72", "#7ee787", "#e3b341", "#79c0ff", "#d2a8ff", "#56d4dd",
                "#e6edf3", "#6e7681", "#ffa198", "#aff5b4", "#f8e3a1", "#a5d6ff", "#edc4ff",
                "#a5f3fc", "#ffffff",
            ],
        }
    }

    pub fn light() -> Self {
        Self {
            background: "#ffffff",
            foreground: "#1f2328",
            cursor: "#1f2328",
            selection: "rgba(9, 105, 218, 0.2)",
            ansi: [
                "#24292f", "#cf222e", "#116329", "#4d2d00", "#0969da", "#8250df", "#1b7c83",
                "#6e7781", "#57606a", "#a40e26", "#1a7f37", "#633c01", "#218bff", "#a475f9",
                "#3192aa", "#8c959f",
            ],
        }
    }
}

/// Pixel size of one character cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub cell_width: f32,
    pub cell_height: f32,
}

impl FontMetrics {
    /// Derive cell size from a font size and the font's proportions.
    pub fn from_font_size(font_size: f32, cell_width_ratio: f32, line_height: f32) -> Self {
        Self {
            cell_width: font_size * cell_width_ratio,
            cell_height: font_size * line_height,
        }
    }
}

/// Visual configuration a surface is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceStyle {
    pub theme: Theme,
    pub font_family: String,
    pub font: FontMetrics,
    pub cursor_blink: bool,
    pub scrollback_limit: usize,
}

impl Default for SurfaceStyle {
    fn default() -> Self {
        Self {
            theme: Theme::dark(),
            font_family: "ui-monospace, Menlo, Consolas, monospace".to_string(),
            font: FontMetrics::from_font_size(13.0, 0.6, 1.2),
            cursor_blink: true,
            scrollback_limit: 1000,
        }
    }
}

pub struct RenderSurface {
    vt: avt::Vt,
    style: SurfaceStyle,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    pending: Vec<u8>,
    focused: bool,
    exited: bool,
    disposed: bool,
}

/// A surface shared between its session and that session's output router.
pub type SharedSurface = Arc<Mutex<RenderSurface>>;

impl RenderSurface {
    pub fn new(style: SurfaceStyle, geometry: Geometry) -> Self {
        let vt = avt::Vt::builder()
            .size(geometry.cols as usize, geometry.rows as usize)
            .scrollback_limit(style.scrollback_limit)
            .build();
        Self {
            vt,
            style,
            pending: Vec::new(),
            focused: false,
            exited: false,
            disposed: false,
        }
    }

    pub fn shared(style: SurfaceStyle, geometry: Geometry) -> SharedSurface {
        Arc::new(Mutex::new(Self::new(style, geometry)))
    }

    /// Feed raw output bytes into the terminal.
    pub fn write(&mut self, data: &[u8]) -> Result<(), SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        self.pending.extend_from_slice(data);
        let buf = std::mem::take(&mut self.pending);
        let (text, rest) = split_utf8(&buf);
        if !text.is_empty() {
            let _ = self.vt.feed_str(&text);
        }
        self.pending = rest.to_vec();
        Ok(())
    }

    /// Write the end-of-session marker and remember the process is gone.
    pub fn mark_exited(&mut self) -> Result<(), SurfaceError> {
        self.write(EXIT_MARKER.as_bytes())?;
        self.exited = true;
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn resize(&mut self, geometry: Geometry) -> Result<(), SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        if self.geometry() != geometry {
            let _ = self.vt.resize(geometry.cols as usize, geometry.rows as usize);
        }
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        let (cols, rows) = self.vt.size();
        Geometry {
            rows: rows as u16,
            cols: cols as u16,
        }
    }

    pub fn style(&self) -> &SurfaceStyle {
        &self.style
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.style.theme = theme;
    }

    pub fn focus(&mut self) {
        if !self.disposed {
            self.focused = true;
        }
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Release the terminal state. Further writes fail with [`SurfaceError::Disposed`].
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.focused = false;
        self.pending.clear();
        self.vt = avt::Vt::builder().size(1, 1).scrollback_limit(0).build();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Visible rows, trailing whitespace trimmed.
    pub fn screen_lines(&self) -> Vec<String> {
        self.vt
            .view()
            .map(|l| l.text().trim_end().to_string())
            .collect()
    }

    /// Scrollback plus visible rows as one string, trailing blank lines dropped.
    pub fn contents(&self) -> String {
        let mut lines: Vec<String> = self
            .vt
            .lines()
            .map(|l| l.text().trim_end().to_string())
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}

/// Split `buf` into the longest decodable prefix and an incomplete tail.
///
/// Invalid sequences in the middle are replaced with U+FFFD; only a
/// sequence cut off at the very end is held back.
fn split_utf8(buf: &[u8]) -> (String, &[u8]) {
    let mut out = String::with_capacity(buf.len());
    let mut rest = buf;
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.push_str(s);
                return (out, &[]);
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // valid_up_to() guarantees this prefix is UTF-8.
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => return (out, after),
                }
            }
        }
    }
}
