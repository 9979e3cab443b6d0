//! Runtime settings, credential loading and duration parsing.
//!
//! Everything here is resolved once at startup and then passed by value (or
//! behind an `Arc`) into the components that need it.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Collector base URL; the device identity is appended as the last path segment.
pub const DEFAULT_ENDPOINT: &str = "https://go.larvai.com/api/v1/sensors";

/// Enrollment file, relative to the working directory.
pub const DEFAULT_ENROLLMENT_FILE: &str = "authorized_sensors.json";

/// Credential file name inside the user's home directory.
pub const CREDENTIAL_FILE_NAME: &str = ".insectius-monitor";

pub const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const WARMUP_DELAY: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CONCURRENT_PUSHES: usize = 16;

/// Errors resolving startup configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("credential file {0} not found; create it containing your API key")]
    CredentialMissing(PathBuf),
    #[error("credential file {0} is empty; add your API key")]
    CredentialEmpty(PathBuf),
    #[error("failed to read credential file {path}: {source}")]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot determine home directory for the credential file")]
    NoHomeDirectory,
    #[error("--hostname-tag was requested but the local hostname cannot be determined")]
    NoHostname,
}

/// Resolved settings for one gateway session.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub token: String,
    /// Gateway hostname sent with every push, if enabled.
    pub hostname: Option<String>,
    pub sync_interval: Duration,
    pub warmup: Duration,
    pub online_timeout: Duration,
    pub request_timeout: Duration,
    pub max_concurrent_pushes: usize,
}

impl Settings {
    /// Defaults for everything except the credential.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: token.into(),
            hostname: None,
            sync_interval: SYNC_INTERVAL,
            warmup: WARMUP_DELAY,
            online_timeout: crate::liveness::ONLINE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            max_concurrent_pushes: MAX_CONCURRENT_PUSHES,
        }
    }

    /// URL for pushes of one device.
    pub fn device_url(&self, identity: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), identity)
    }
}

/// `~/.insectius-monitor`
pub fn default_credential_path() -> Result<PathBuf, ConfigError> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(CREDENTIAL_FILE_NAME))
        .ok_or(ConfigError::NoHomeDirectory)
}

/// Read the bearer token, trimming surrounding whitespace.
pub fn load_token(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::CredentialMissing(path.to_path_buf())
        } else {
            ConfigError::CredentialRead {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let token = content.trim();
    if token.is_empty() {
        return Err(ConfigError::CredentialEmpty(path.to_path_buf()));
    }
    Ok(token.to_string())
}

/// Hostname of the gateway, from the kernel or the `HOSTNAME` environment variable.
pub fn local_hostname() -> Option<String> {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
}

/// Hostname to tag pushes with, when tagging is `requested`.
///
/// # Arguments
/// * `requested` - Whether `--hostname-tag` was given
/// * `lookup` - Hostname source, normally [`local_hostname`]
///
/// # Returns
/// `Ok(None)` when tagging is off, the hostname when it resolves, and
/// `ConfigError::NoHostname` when tagging was requested but nothing resolved.
pub fn resolve_hostname(
    requested: bool,
    lookup: impl FnOnce() -> Option<String>,
) -> Result<Option<String>, ConfigError> {
    if !requested {
        return Ok(None);
    }
    lookup().map(Some).ok_or(ConfigError::NoHostname)
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ruuvi_gateway::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s".
    let (num, unit_ms) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1_000)
    } else {
        (src, 1_000)
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration out of range: {src}"))
}

/// Like [`parse_duration`], but rejects zero.
///
/// Used for periods and timeouts, where zero would mean a timer that never
/// waits or a request that can never complete.
pub fn parse_positive_duration(src: &str) -> Result<Duration, String> {
    let duration = parse_duration(src)?;
    if duration.is_zero() {
        return Err(format!("duration must be greater than zero: {}", src.trim()));
    }
    Ok(duration)
}

/// Render a duration in the largest unit that represents it exactly (`5m`, `10s`, `500ms`).
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    match ms {
        0 => "0s".to_string(),
        _ if ms % 3_600_000 == 0 => format!("{}h", ms / 3_600_000),
        _ if ms % 60_000 == 0 => format!("{}m", ms / 60_000),
        _ if ms % 1_000 == 0 => format!("{}s", ms / 1_000),
        _ => format!("{ms}ms"),
    }
}
