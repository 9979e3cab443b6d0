//! Status sinks: where the gateway reports what it is doing.
//!
//! The core only ever talks to [`StatusSink`]. Each presentation (headless
//! log output, full-screen terminal) is an independent adapter behind it and
//! must behave the same from the core's point of view: calls return
//! immediately and nothing is read back.

pub mod log;
pub mod terminal;

pub use log::LogSink;
pub use terminal::TerminalSink;

/// Receiver of user-facing status events.
pub trait StatusSink: Send + Sync {
    /// Outcome of the most recent push; `context` is a short human-readable label.
    fn report_status(&self, success: bool, context: &str);

    /// One line of activity log.
    fn append_log(&self, line: &str);

    /// Enrolled devices currently online, out of all enrolled devices.
    fn report_liveness(&self, online: usize, total: usize);
}

/// Available presentations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DisplayMode {
    /// Structured log lines (suitable for systemd/journald)
    #[default]
    Log,
    /// Full-screen terminal status board
    Terminal,
}
