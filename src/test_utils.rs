use crate::app::Scanner;
use crate::decoder::Frame;
use crate::delivery::{HttpResponse, Transport, TransportError};
use crate::enrollment::EnrollmentRecord;
use crate::reading::Reading;
use crate::scanner::{Backend, ScanError};
use crate::sink::StatusSink;
use chrono::{TimeZone, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Identity encoded in [`canonical_payload`].
pub const TEST_IDENTITY: &str = "CA:FE:BA:BE:12:34";

/// RAWv2 payload decoding to 2.565 °C, 31.4575 %, 532.79 hPa, 2977 mV, -20 dBm.
pub fn canonical_payload() -> Vec<u8> {
    vec![
        0x05, // Format 5
        0x02, 0x01, // Temperature: 513 * 0.005 = 2.565 °C
        0x31, 0x27, // Humidity: 12583 * 0.0025 = 31.4575 %
        0x0C, 0xCF, // Pressure: (3279 + 50000) / 100 = 532.79 hPa
        0x00, 0x04, // Acceleration X
        0xFF, 0xFC, // Acceleration Y
        0x04, 0x0C, // Acceleration Z
        0xAC, 0x36, // Battery: 2977 mV, TX power field 0b10110
        0x42, // Movement counter
        0x00, 0xCD, // Sequence
        0xCA, 0xFE, 0xBA, 0xBE, 0x12, 0x34, // MAC address
    ]
}

/// Canonical payload with a different trailing MAC.
pub fn payload_for(mac: [u8; 6]) -> Vec<u8> {
    let mut data = canonical_payload();
    data[18..24].copy_from_slice(&mac);
    data
}

pub fn reading(identity: &str, temperature: f64) -> Reading {
    Reading {
        temperature,
        humidity: 45.0,
        pressure: 1013.25,
        battery: 2977,
        tx_power: 4,
        source: identity.to_string(),
    }
}

pub fn record(identity: &str, name: &str) -> EnrollmentRecord {
    EnrollmentRecord {
        identity: identity.to_string(),
        name: name.to_string(),
        registered_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
    }
}

/// Scanner that replays a fixed list of frames.
#[derive(Debug)]
pub struct FakeScanner {
    frames: Mutex<Vec<Frame>>,
    keep_open: bool,
}

impl FakeScanner {
    /// Stream ends after the last frame.
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: Mutex::new(frames),
            keep_open: false,
        }
    }

    /// Stream stays open after the last frame, like a real scan.
    pub fn open(frames: Vec<Frame>) -> Self {
        Self {
            frames: Mutex::new(frames),
            keep_open: true,
        }
    }
}

impl Scanner for FakeScanner {
    fn start_scan(
        &self,
        _backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>> {
        let frames = self.frames.lock().unwrap().clone();
        let keep_open = self.keep_open;
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<Frame>(frames.len().max(1));
            tokio::spawn(async move {
                for frame in frames {
                    let _ = tx.send(frame).await;
                }
                if keep_open {
                    tx.closed().await;
                }
            });
            Ok(rx)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub token: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Transport answering every request the same way and recording what was sent.
#[derive(Debug)]
pub struct FakeTransport {
    response: Result<HttpResponse, TransportError>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeTransport {
    pub fn responding(status: u16, body: &str) -> Self {
        Self {
            response: Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: TransportError) -> Self {
        Self {
            response: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn post<'a>(
        &'a self,
        url: &'a str,
        token: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            token: token.to_string(),
            body,
        });
        let response = self.response.clone();
        Box::pin(async move { response })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Status(bool, String),
    Log(String),
    Liveness(usize, usize),
}

/// Sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Log(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Status(success, _) => Some(success),
                _ => None,
            })
            .collect()
    }

    pub fn liveness(&self) -> Vec<(usize, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Liveness(online, total) => Some((online, total)),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn report_status(&self, success: bool, context: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Status(success, context.to_string()));
    }

    fn append_log(&self, line: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Log(line.to_string()));
    }

    fn report_liveness(&self, online: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Liveness(online, total));
    }
}
