use derive_setters::Setters;
use nix::sys::signal::Signal;
use std::{ffi::OsString, num::NonZeroU32};

/// What to freeze, for how long, and what to run meanwhile
#[derive(Debug, Clone, Derivative, Setters)]
#[derivative(Default)]
#[setters(prefix = "with_", strip_option)]
#[non_exhaustive]
pub struct Config {
    /// Only freeze the output with this name; all outputs otherwise
    pub output: Option<String>,

    /// Seconds after which the freeze ends on its own
    pub timeout: Option<NonZeroU32>,

    /// Child command and its arguments; empty means no child
    pub command: Vec<OsString>,

    /// Signal sent to the child's process group on shutdown
    #[derivative(Default(value = "Signal::SIGTERM"))]
    pub kill_signal: Signal,

    /// Whether the pointer is part of the captured image
    pub include_cursor: bool,
}

impl Config {
    pub fn has_child(&self) -> bool {
        !self.command.is_empty()
    }
}
