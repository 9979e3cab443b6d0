//! Per-device liveness based on how recently a broadcast was accepted.

use crate::enrollment::EnrollmentSet;
use crate::sink::StatusSink;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Devices not heard from within this window are offline.
pub const ONLINE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Online/total counts for the enrolled devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessCounts {
    pub online: usize,
    pub total: usize,
}

impl LivenessCounts {
    pub fn offline(&self) -> usize {
        self.total - self.online
    }
}

/// Last-seen instant per device identity.
#[derive(Debug, Default)]
pub struct LivenessTable {
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl LivenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `identity` was heard at `now`.
    pub fn mark_seen(&self, identity: &str, now: Instant) {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        last_seen.insert(identity.to_string(), now);
    }

    pub fn last_seen(&self, identity: &str) -> Option<Instant> {
        let last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        last_seen.get(identity).copied()
    }

    /// Bucket every enrolled identity as online or offline.
    ///
    /// A device is online only if it has an entry younger than `online_timeout`.
    /// Never-seen devices count as offline.
    pub fn classify(
        &self,
        enrolled: &EnrollmentSet,
        now: Instant,
        online_timeout: Duration,
    ) -> LivenessCounts {
        let last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        let online = enrolled
            .identities()
            .filter(|id| {
                last_seen
                    .get(*id)
                    .is_some_and(|seen| now.saturating_duration_since(*seen) < online_timeout)
            })
            .count();

        LivenessCounts {
            online,
            total: enrolled.len(),
        }
    }
}

/// Classify the enrolled devices and hand the counts to the sink.
pub fn report(
    table: &LivenessTable,
    enrolled: &EnrollmentSet,
    sink: &dyn StatusSink,
    now: Instant,
    online_timeout: Duration,
) -> LivenessCounts {
    let counts = table.classify(enrolled, now, online_timeout);
    sink.report_liveness(counts.online, counts.total);
    counts
}
