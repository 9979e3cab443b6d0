//! Capture layer: turns radio advertisements into a stream of [`Frame`]s.
//!
//! Backends only capture; decoding, authorization and everything after it is
//! done by the consumer of the returned channel.

#[cfg(feature = "bluer")]
pub mod bluer;

pub mod hcidump;
pub mod report;

use crate::decoder::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner start-up.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// External capture tool could not be started
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Channel buffer size for captured frames.
pub const FRAME_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// `hcitool lescan` + `hcidump --raw` external processes
    Hcidump,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(not(feature = "bluer"))]
        return Backend::Hcidump;
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            Backend::Hcidump => write!(f, "hcidump"),
        }
    }
}

/// Start capturing frames with the given backend. The stream runs until the process exits.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<Frame>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        Backend::Hcidump => hcidump::start_scan().await,
    }
}
