//! Enrolled sensors and the allowlist derived from them.
//!
//! The enrollment file is the only persistent state of the gateway:
//!
//! ```json
//! { "authorized_sensors": [ { "mac": "CA:FE:BA:BE:12:34", "name": "Ruuvi 1234", "registered_at": "..." } ] }
//! ```
//!
//! It is read once at startup and only replaced wholesale by re-enrollment.

use crate::app::Scanner;
use crate::decoder::{decode_frame, is_sensor_frame};
use crate::mac_address::MacAddress;
use crate::scanner::{Backend, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// One sensor registered as authorized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    #[serde(rename = "mac")]
    pub identity: String,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// Ordered list of enrolled sensors, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentSet {
    #[serde(rename = "authorized_sensors", default)]
    pub sensors: Vec<EnrollmentRecord>,
}

impl EnrollmentSet {
    pub fn new(sensors: Vec<EnrollmentRecord>) -> Self {
        Self { sensors }
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|s| s.identity.as_str())
    }

    /// Identities that can never match a decoded frame because they are not canonical.
    pub fn non_canonical(&self) -> Vec<&str> {
        self.identities()
            .filter(|id| {
                id.parse::<MacAddress>()
                    .ok()
                    .is_none_or(|mac| mac.identity() != *id)
            })
            .collect()
    }
}

/// Read-only lookup built once per session from the enrollment set.
///
/// Matching is exact: no prefix matching and no case folding.
#[derive(Debug, Clone, Default)]
pub struct Authorization {
    allowed: HashSet<String>,
    names: HashMap<String, String>,
}

impl Authorization {
    pub fn from_set(set: &EnrollmentSet) -> Self {
        Self {
            allowed: set.identities().map(str::to_string).collect(),
            names: set
                .sensors
                .iter()
                .map(|s| (s.identity.clone(), s.name.clone()))
                .collect(),
        }
    }

    pub fn is_authorized(&self, identity: &str) -> bool {
        self.allowed.contains(identity)
    }

    /// Name to show for a device: enrolled name, else advertised name, else the identity.
    pub fn display_name(&self, identity: &str, advertised: Option<&str>) -> String {
        self.names
            .get(identity)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
            .or(advertised.filter(|name| !name.is_empty()))
            .unwrap_or(identity)
            .to_string()
    }
}

/// Errors from loading, saving or building the enrollment set.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("failed to access enrollment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse enrollment file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize enrollment set: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no RuuviTag sensors found; make sure they are powered on and nearby")]
    NoSensorsFound,
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// JSON file holding the enrollment set.
#[derive(Debug, Clone)]
pub struct EnrollmentStore {
    path: PathBuf,
}

impl EnrollmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the set; `Ok(None)` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<EnrollmentSet>, EnrollmentError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(EnrollmentError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| EnrollmentError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the stored set atomically (write to a sibling file, then rename).
    pub fn save(&self, set: &EnrollmentSet) -> Result<(), EnrollmentError> {
        let content = serde_json::to_string_pretty(set)?;
        let io_err = |source| EnrollmentError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

/// Scan for `window` and enroll every sensor-family device heard.
///
/// Devices are keyed by their decoded identity when the frame decodes, or by
/// the broadcast address otherwise. The first advertised name seen is kept.
pub async fn enroll(
    scanner: &dyn Scanner,
    backend: Backend,
    window: Duration,
) -> Result<EnrollmentSet, EnrollmentError> {
    let mut frames = scanner.start_scan(backend).await?;
    let mut found: BTreeMap<String, EnrollmentRecord> = BTreeMap::new();

    let collect = async {
        while let Some(frame) = frames.recv().await {
            if !is_sensor_frame(&frame) {
                continue;
            }
            let identity = decode_frame(&frame)
                .map(|reading| reading.source)
                .unwrap_or_else(|| frame.address.to_uppercase());

            found.entry(identity.clone()).or_insert_with(|| {
                tracing::info!(%identity, name = ?frame.name, "sensor enrolled");
                EnrollmentRecord {
                    name: frame.name.clone().unwrap_or_default(),
                    identity,
                    registered_at: Utc::now(),
                }
            });
        }
    };
    // The scan never ends on its own; the window bounds it.
    let _ = tokio::time::timeout(window, collect).await;

    if found.is_empty() {
        return Err(EnrollmentError::NoSensorsFound);
    }
    Ok(EnrollmentSet::new(found.into_values().collect()))
}
