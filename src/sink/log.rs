//! Headless sink that turns status events into `tracing` events.

use super::StatusSink;

/// Reports through the global `tracing` subscriber under the `status` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn report_status(&self, success: bool, context: &str) {
        if success {
            tracing::info!(target: "status", success, "{context}");
        } else {
            tracing::warn!(target: "status", success, "{context}");
        }
    }

    fn append_log(&self, line: &str) {
        tracing::info!(target: "status", "{line}");
    }

    fn report_liveness(&self, online: usize, total: usize) {
        if online < total {
            tracing::warn!(target: "status", online, total, offline = total - online, "sensors: {online}/{total} online");
        } else {
            tracing::info!(target: "status", online, total, "sensors: {online}/{total} online");
        }
    }
}
