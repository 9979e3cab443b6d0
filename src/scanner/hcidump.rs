//! `hcitool lescan` + `hcidump --raw` backend.
//!
//! Works on hosts where the BlueZ daemon is unavailable but the legacy HCI
//! tools are installed. `hcitool` keeps the controller scanning while
//! `hcidump` prints every HCI packet as hex; packets are reassembled from the
//! dump output and parsed into frames. Both tools are restarted periodically
//! since long-running `lescan` sessions tend to stall.

use super::{FRAME_CHANNEL_BUFFER_SIZE, ScanError, report};
use crate::decoder::{Frame, parse_hex};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;

/// How long one capture session runs before both tools are restarted.
pub const SESSION_LENGTH: Duration = Duration::from_secs(30);

/// Pause between capture sessions.
pub const RESTART_PAUSE: Duration = Duration::from_secs(2);

/// Running `hcitool` and `hcidump` pair.
struct Session {
    _lescan: Child,
    _dump: Child,
    output: ChildStdout,
}

fn spawn_session() -> Result<Session, ScanError> {
    let lescan = Command::new("hcitool")
        .args(["lescan", "--passive", "--duplicates"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ScanError::Spawn {
            tool: "hcitool",
            source,
        })?;

    let mut dump = Command::new("hcidump")
        .arg("--raw")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ScanError::Spawn {
            tool: "hcidump",
            source,
        })?;

    let output = dump.stdout.take().ok_or_else(|| ScanError::Spawn {
        tool: "hcidump",
        source: std::io::Error::other("stdout not captured"),
    })?;

    Ok(Session {
        _lescan: lescan,
        _dump: dump,
        output,
    })
}

pub async fn start_scan() -> Result<mpsc::Receiver<Frame>, ScanError> {
    // Spawn the first session up front so a missing tool fails start-up.
    let first = spawn_session()?;
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    tracing::info!("hcidump scan started");

    tokio::spawn(async move {
        let mut session = Some(first);
        loop {
            if let Some(active) = session.take() {
                let _ = tokio::time::timeout(SESSION_LENGTH, pump(active.output, &tx)).await;
                // Dropping the children kills both tools.
            }
            if tx.is_closed() {
                break;
            }

            tokio::time::sleep(RESTART_PAUSE).await;
            match spawn_session() {
                Ok(next) => {
                    tracing::debug!("hcidump session restarted");
                    session = Some(next);
                }
                Err(e) => tracing::warn!(error = %e, "failed to restart hcidump session"),
            }
        }
    });

    Ok(rx)
}

/// Forward frames from one dump session until its output ends or the receiver goes away.
async fn pump(output: ChildStdout, tx: &mpsc::Sender<Frame>) {
    let mut lines = BufReader::new(output).lines();
    let mut assembler = PacketAssembler::default();

    loop {
        let packet = match lines.next_line().await {
            Ok(Some(line)) => match assembler.push(&line) {
                Some(packet) => packet,
                None => continue,
            },
            Ok(None) => match assembler.finish() {
                Some(packet) => {
                    forward(&packet, tx).await;
                    return;
                }
                None => return,
            },
            Err(e) => {
                tracing::debug!(error = %e, "hcidump read failed");
                return;
            }
        };

        if !forward(&packet, tx).await {
            return;
        }
    }
}

/// Returns false once the receiver is gone.
async fn forward(packet: &str, tx: &mpsc::Sender<Frame>) -> bool {
    let Some(bytes) = parse_hex(packet) else {
        tracing::trace!(packet, "unparseable hcidump packet");
        return true;
    };
    for frame in report::parse_event(&bytes) {
        if tx.send(frame).await.is_err() {
            return false;
        }
    }
    true
}

/// Reassembles `hcidump --raw` output into one hex string per packet.
///
/// A line starting with `>` (incoming) or `<` (outgoing) opens a new packet;
/// indented lines continue the current one. Output before the first packet
/// marker (the tool's banner) is discarded.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    current: Option<String>,
}

impl PacketAssembler {
    /// Feed one output line. Returns the previous packet when this line starts a new one.
    pub fn push(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix('>')
            .or_else(|| trimmed.strip_prefix('<'))
        {
            let finished = self.current.replace(rest.trim().to_string());
            return finished.filter(|p| !p.is_empty());
        }

        if let Some(current) = self.current.as_mut()
            && !trimmed.is_empty()
        {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(trimmed);
        }
        None
    }

    /// Flush the packet in progress at end of output.
    pub fn finish(&mut self) -> Option<String> {
        self.current.take().filter(|p| !p.is_empty())
    }
}
