//! tabterm - tabbed terminal sessions behind one panel.
//!
//! A [`Multiplexer`] keeps any number of interactive shell sessions, shows
//! one at a time inside a resizable panel, and keeps each backing process's
//! terminal geometry in step with what is on screen.

pub mod backend;
pub mod config;
pub mod error;
pub mod mux;
pub mod panel;
pub mod pty;
pub mod resize;
pub mod router;
pub mod session;
pub mod surface;
pub mod tabs;
pub mod transport;
pub mod view;

pub use backend::{Backend, BackendError, SessionId};
pub use config::Config;
pub use error::{Failure, FailureHook, MuxError};
pub use mux::{Multiplexer, MuxOptions, Snapshot, WorkingDir};
pub use pty::PtyBackend;
pub use view::{HeadlessHost, ViewHandle, ViewHost};
