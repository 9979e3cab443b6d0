//! Most recent reading per device.

use crate::reading::Reading;
use std::collections::HashMap;
use std::sync::Mutex;

/// Last-write-wins store of the newest reading per identity.
///
/// Entries never expire; a device that stops broadcasting keeps its last value.
#[derive(Debug, Default)]
pub struct ReadingCache {
    readings: Mutex<HashMap<String, Reading>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reading` as the newest for `identity`, replacing any previous one.
    ///
    /// # Arguments
    /// * `identity` - Canonical MAC of the sensor
    /// * `reading` - Decoded reading; the cache keeps it until replaced
    pub fn put(&self, identity: &str, reading: Reading) {
        let mut readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        readings.insert(identity.to_string(), reading);
    }

    /// Point-in-time copy; the lock is released before the caller iterates.
    pub fn snapshot_all(&self) -> HashMap<String, Reading> {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.readings.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
