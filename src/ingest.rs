//! Ingestion: decode, authorize and record every captured frame.

use crate::cache::ReadingCache;
use crate::decoder::{Frame, decode_frame};
use crate::enrollment::{Authorization, EnrollmentSet};
use crate::liveness::{self, LivenessTable};
use crate::reading::Reading;
use crate::sink::StatusSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Consumer of the frame stream. Owns nothing but handles to shared state.
pub struct Ingestor {
    authorization: Arc<Authorization>,
    enrolled: Arc<EnrollmentSet>,
    cache: Arc<ReadingCache>,
    liveness: Arc<LivenessTable>,
    sink: Arc<dyn StatusSink>,
    online_timeout: Duration,
}

impl Ingestor {
    /// Create an ingestor that only admits the `enrolled` sensors.
    ///
    /// # Arguments
    /// * `enrolled` - Allowlist; frames from any other identity are dropped
    /// * `cache` - Receives the newest reading of each admitted sensor
    /// * `liveness` - Marked on every admitted frame
    /// * `sink` - Receives detection lines and the updated liveness count
    /// * `online_timeout` - Window used for that liveness count
    pub fn new(
        enrolled: Arc<EnrollmentSet>,
        cache: Arc<ReadingCache>,
        liveness: Arc<LivenessTable>,
        sink: Arc<dyn StatusSink>,
        online_timeout: Duration,
    ) -> Self {
        Self {
            authorization: Arc::new(Authorization::from_set(&enrolled)),
            enrolled,
            cache,
            liveness,
            sink,
            online_timeout,
        }
    }

    /// Handle one frame received at `now`.
    ///
    /// Frames that do not decode, or decode to an identity that is not
    /// enrolled, are dropped without any trace. Accepted frames update the
    /// liveness table and the cache, then are reported to the sink.
    pub fn accept(&self, frame: &Frame, now: Instant) -> Option<Reading> {
        let reading = decode_frame(frame)?;
        if !self.authorization.is_authorized(&reading.source) {
            return None;
        }

        self.liveness.mark_seen(&reading.source, now);
        self.cache.put(&reading.source, reading.clone());
        tracing::debug!(identity = %reading.source, "reading accepted");

        let name = self
            .authorization
            .display_name(&reading.source, frame.name.as_deref());
        self.sink.append_log(&format!("{name} detected"));
        self.sink.append_log(&format!(
            "Data: {:.1}°C, {:.1}% humidity, {}mV",
            reading.temperature, reading.humidity, reading.battery
        ));
        liveness::report(
            &self.liveness,
            &self.enrolled,
            self.sink.as_ref(),
            now,
            self.online_timeout,
        );

        Some(reading)
    }

    /// Consume frames until the capture stream ends.
    pub async fn run(self, mut frames: mpsc::Receiver<Frame>) {
        self.sink.append_log("Starting sensor scan...");
        while let Some(frame) = frames.recv().await {
            self.accept(&frame, Instant::now());
        }
        tracing::warn!("frame stream ended");
    }
}
