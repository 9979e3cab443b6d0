//! Full-screen terminal status board.
//!
//! Draws a fixed-width box: the sync status in a green or red block, the
//! online sensor count, a clock, and the most recent activity first.
//!
//! Sink calls only update the board and wake the task started by
//! [`TerminalSink::spawn_refresh`], which does all the drawing: once per
//! second for the clock, and promptly after each change.

use super::StatusSink;
use chrono::{DateTime, Local};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const WIDTH: usize = 48;
const TITLE: &str = "Ruuvi Gateway";
const VISIBLE_LOG_LINES: usize = 10;

const RESET: &str = "\x1b[0m";
const BG_RED: &str = "\x1b[41m";
const BG_GREEN: &str = "\x1b[42m";
const BG_GRAY: &str = "\x1b[100m";
const FG_WHITE: &str = "\x1b[97m";
const BOLD: &str = "\x1b[1m";
const CLEAR: &str = "\x1b[2J\x1b[H";

#[derive(Debug)]
struct Board {
    /// `None` until the first push completes.
    last_sync: Option<bool>,
    context: String,
    sensors: String,
    logs: Vec<String>,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            last_sync: None,
            context: "Starting up...".to_string(),
            sensors: "Sensors: --".to_string(),
            logs: vec!["Waiting for activity...".to_string()],
        }
    }
}

/// Terminal renderer writing ANSI frames to `W` (stdout in production).
pub struct TerminalSink<W: Write + Send> {
    board: Mutex<Board>,
    out: Mutex<W>,
    changed: Notify,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            board: Mutex::new(Board::default()),
            out: Mutex::new(out),
            changed: Notify::new(),
        }
    }

    /// Build the full board for the given wall-clock time.
    pub fn frame(&self, now: DateTime<Local>) -> String {
        let board = self.board.lock().unwrap_or_else(|e| e.into_inner());
        let rule = "═".repeat(WIDTH);
        let mut lines = Vec::new();

        lines.push(format!("╔{rule}╗"));
        let gap = WIDTH.saturating_sub(2 + width(TITLE) + width(&board.sensors));
        lines.push(format!("║ {TITLE}{}{} ║", " ".repeat(gap), board.sensors));
        lines.push(format!("╠{rule}╣"));
        lines.push(format!("║{}║", " ".repeat(WIDTH)));

        let (bg, icon, label) = match board.last_sync {
            Some(true) => (BG_GREEN, "OK", "Last sync: OK"),
            Some(false) => (BG_RED, "X", "Last sync: ERROR"),
            None => (BG_GRAY, "...", "Last sync: pending"),
        };
        let block = format!("{:^11}", icon);
        let left = (WIDTH - 11) / 2;
        lines.push(format!(
            "║{}{bg}{FG_WHITE}{block}{RESET}{}║",
            " ".repeat(left),
            " ".repeat(WIDTH - left - 11)
        ));
        lines.push(format!("║{}║", center(label)));
        lines.push(format!("║{}║", center(&truncate(&board.context, WIDTH))));
        lines.push(format!(
            "║{}║",
            center(&now.format("%H:%M:%S - %d/%m/%Y").to_string())
        ));
        lines.push(format!("║{}║", " ".repeat(WIDTH)));

        lines.push(format!("╠{rule}╣"));
        let title = center("Activity");
        lines.push(format!("║{BOLD}{title}{RESET}║"));
        lines.push(format!("╠{rule}╣"));

        for i in 0..VISIBLE_LOG_LINES {
            let line = board.logs.get(i).map(String::as_str).unwrap_or("");
            lines.push(format!("║ {} ║", pad(&truncate(line, WIDTH - 2), WIDTH - 2)));
        }
        lines.push(format!("╚{rule}╝"));

        lines.join("\n")
    }

    /// Clear the screen and draw the current board.
    pub fn redraw(&self) {
        let frame = self.frame(Local::now());
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        // A closed terminal must not take the gateway down with it.
        let _ = write!(out, "{CLEAR}{frame}\n").and_then(|_| out.flush());
    }

    fn update(&self, apply: impl FnOnce(&mut Board)) {
        {
            let mut board = self.board.lock().unwrap_or_else(|e| e.into_inner());
            apply(&mut board);
        }
        // Coalesces: any number of updates before the next draw wake it once.
        self.changed.notify_one();
    }
}

impl<W: Write + Send + 'static> TerminalSink<W> {
    /// Draw the board after every change, and every second so the clock
    /// keeps ticking between events.
    pub fn spawn_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = sink.changed.notified() => {}
                }
                sink.redraw();
            }
        })
    }
}

impl<W: Write + Send> StatusSink for TerminalSink<W> {
    fn report_status(&self, success: bool, context: &str) {
        self.update(|board| {
            board.last_sync = Some(success);
            board.context = context.to_string();
        });
    }

    fn append_log(&self, line: &str) {
        let line = format!("[{}] {line}", Local::now().format("%H:%M:%S"));
        self.update(|board| {
            board.logs.insert(0, line);
            board.logs.truncate(VISIBLE_LOG_LINES * 2);
        });
    }

    fn report_liveness(&self, online: usize, total: usize) {
        self.update(|board| {
            board.sensors = if online == total {
                format!("Sensors: {online}/{total} ✓")
            } else {
                format!("Sensors: {online}/{total}")
            };
        });
    }
}

fn width(s: &str) -> usize {
    s.chars().count()
}

fn truncate(s: &str, max: usize) -> String {
    if width(s) <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

fn pad(s: &str, to: usize) -> String {
    format!("{s}{}", " ".repeat(to.saturating_sub(width(s))))
}

fn center(s: &str) -> String {
    let left = WIDTH.saturating_sub(width(s)) / 2;
    pad(&format!("{}{s}", " ".repeat(left)), WIDTH)
}
