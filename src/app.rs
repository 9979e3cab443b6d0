//! Core application runner for `ruuvi-gateway`.
//!
//! This module is decoupled from process setup (logging, credential file,
//! exit codes) so both the enrollment flow and the gateway session can be
//! tested deterministically with an injected scanner, transport and sink.

use crate::cache::ReadingCache;
use crate::config::{
    self, ConfigError, DEFAULT_ENDPOINT, DEFAULT_ENROLLMENT_FILE, MAX_CONCURRENT_PUSHES, Settings,
    parse_duration, parse_positive_duration,
};
use crate::decoder::Frame;
use crate::delivery::{DeliveryClient, Transport, TransportError};
use crate::enrollment::{self, EnrollmentError, EnrollmentSet, EnrollmentStore};
use crate::ingest::Ingestor;
use crate::liveness::LivenessTable;
use crate::scanner::{Backend, ScanError};
use crate::scheduler::Scheduler;
use crate::sink::{DisplayMode, StatusSink};
use clap::Parser;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Command line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Collector base URL; the device MAC is appended per push.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// JSON file listing the enrolled sensors.
    #[arg(long, default_value = DEFAULT_ENROLLMENT_FILE)]
    pub enrollment_file: PathBuf,

    /// File holding the collector API token [default: ~/.insectius-monitor]
    #[arg(long)]
    pub credential_file: Option<PathBuf>,

    /// Interval between delivery (and liveness) cycles.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = parse_positive_duration, default_value = "5m")]
    pub sync_interval: Duration,

    /// Delay before the first delivery cycle.
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub warmup: Duration,

    /// Sensors not heard from within this window count as offline.
    #[arg(long, value_parser = parse_positive_duration, default_value = "2m")]
    pub online_timeout: Duration,

    /// Hard timeout for one push.
    #[arg(long, value_parser = parse_positive_duration, default_value = "10s")]
    pub request_timeout: Duration,

    /// Maximum number of pushes in flight per delivery cycle.
    #[arg(
        long,
        default_value_t = MAX_CONCURRENT_PUSHES,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub max_concurrent_pushes: usize,

    /// Include this gateway's hostname in every push.
    #[arg(long)]
    pub hostname_tag: bool,

    /// How status is presented
    #[arg(long, default_value_t, value_enum)]
    pub display: DisplayMode,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Scan again and overwrite the enrolled sensor list.
    #[arg(long)]
    pub reregister: bool,

    /// How long to scan when enrolling sensors.
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub enroll_duration: Duration,
}

impl Options {
    /// Settings for a gateway session authenticated with `token`.
    ///
    /// # Errors
    /// Returns `ConfigError::NoHostname` when `--hostname-tag` is set and the
    /// local hostname cannot be determined.
    pub fn settings(&self, token: String) -> Result<Settings, ConfigError> {
        self.settings_with_hostname(token, config::local_hostname)
    }

    fn settings_with_hostname(
        &self,
        token: String,
        lookup: impl FnOnce() -> Option<String>,
    ) -> Result<Settings, ConfigError> {
        Ok(Settings {
            endpoint: self.endpoint.clone(),
            hostname: config::resolve_hostname(self.hostname_tag, lookup)?,
            sync_interval: self.sync_interval,
            warmup: self.warmup,
            online_timeout: self.online_timeout,
            request_timeout: self.request_timeout,
            max_concurrent_pushes: self.max_concurrent_pushes,
            ..Settings::new(token)
        })
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create HTTP client: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("frame capture stopped")]
    CaptureEnded,
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>> {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// What this invocation should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// No usable enrollment (or re-enrollment requested): scan and save.
    Enroll,
    /// Run the gateway for the stored sensors.
    Monitor(EnrollmentSet),
}

/// Decide between enrollment and monitoring from the stored enrollment.
pub fn select_mode(options: &Options, store: &EnrollmentStore) -> Result<Mode, RunError> {
    if options.reregister {
        return Ok(Mode::Enroll);
    }
    Ok(match store.load()? {
        Some(set) if !set.is_empty() => Mode::Monitor(set),
        _ => Mode::Enroll,
    })
}

/// Write the numbered list of enrolled sensors.
pub fn print_enrolled(set: &EnrollmentSet, out: &mut dyn Write) -> io::Result<()> {
    for (i, sensor) in set.sensors.iter().enumerate() {
        writeln!(out, "  {}. {} ({})", i + 1, sensor.name, sensor.identity)?;
    }
    Ok(())
}

/// Scan for sensors, replace the stored enrollment and report the result to `out`.
pub async fn enroll_with_io(
    options: &Options,
    scanner: &dyn Scanner,
    store: &EnrollmentStore,
    out: &mut dyn Write,
) -> Result<EnrollmentSet, RunError> {
    writeln!(
        out,
        "Scanning for RuuviTag sensors for {}...",
        config::format_duration(options.enroll_duration)
    )?;

    let set = enrollment::enroll(scanner, options.backend, options.enroll_duration).await?;
    store.save(&set)?;

    writeln!(
        out,
        "Enrollment complete: {} sensor(s) saved to {}",
        set.len(),
        store.path().display()
    )?;
    print_enrolled(&set, out)?;
    writeln!(out, "Only these sensors will be read from now on.")?;
    writeln!(out, "Run with --reregister to enroll again.")?;
    Ok(set)
}

/// Run a gateway session: ingestion on this task, delivery and liveness cycles
/// on their own tasks.
///
/// Returns only when the capture stream ends, which is always an error; the
/// cycle tasks are cancelled with it.
pub async fn run_gateway(
    settings: Arc<Settings>,
    enrolled: EnrollmentSet,
    scanner: &dyn Scanner,
    backend: Backend,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn StatusSink>,
) -> Result<(), RunError> {
    for identity in enrolled.non_canonical() {
        tracing::warn!(identity, "enrolled identity is not a canonical MAC and will never match");
    }

    let frames = scanner.start_scan(backend).await?;
    tracing::info!(%backend, sensors = enrolled.len(), "gateway started");

    let enrolled = Arc::new(enrolled);
    let cache = Arc::new(ReadingCache::new());
    let liveness = Arc::new(LivenessTable::new());
    let client = Arc::new(DeliveryClient::new(
        transport,
        settings.clone(),
        sink.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        cache.clone(),
        liveness.clone(),
        enrolled.clone(),
        client,
        sink.clone(),
        settings.clone(),
    ));

    scheduler.report_liveness();
    let mut cycles = JoinSet::new();
    cycles.spawn(scheduler.clone().run_delivery());
    cycles.spawn(scheduler.run_liveness());

    Ingestor::new(enrolled, cache, liveness, sink, settings.online_timeout)
        .run(frames)
        .await;

    cycles.abort_all();
    Err(RunError::CaptureEnded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        FakeScanner, FakeTransport, RecordingSink, TEST_IDENTITY, canonical_payload, payload_for,
        record,
    };

    fn options(args: &[&str]) -> Options {
        let mut argv = vec!["ruuvi-gateway"];
        argv.extend_from_slice(args);
        Options::try_parse_from(argv).unwrap()
    }

    fn monitor_settings() -> Arc<Settings> {
        let mut settings = Settings::new("secret-token");
        settings.endpoint = "http://collector.test/sensors".to_string();
        Arc::new(settings)
    }

    #[test]
    fn test_option_defaults() {
        let options = options(&[]);
        assert_eq!(options.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(options.enrollment_file, PathBuf::from(DEFAULT_ENROLLMENT_FILE));
        assert_eq!(options.sync_interval, Duration::from_secs(300));
        assert_eq!(options.warmup, Duration::from_secs(10));
        assert_eq!(options.online_timeout, Duration::from_secs(120));
        assert_eq!(options.enroll_duration, Duration::from_secs(10));
        assert_eq!(options.display, DisplayMode::Log);
        assert!(!options.reregister);
        assert!(!options.hostname_tag);
    }

    #[test]
    fn test_options_to_settings() {
        let options = options(&[
            "--endpoint",
            "http://localhost:9000/api",
            "--sync-interval",
            "1m",
            "--max-concurrent-pushes",
            "4",
            "--display",
            "terminal",
            "--backend",
            "hcidump",
        ]);
        assert_eq!(options.backend, Backend::Hcidump);
        assert_eq!(options.display, DisplayMode::Terminal);

        let settings = options.settings("token".to_string()).unwrap();
        assert_eq!(settings.endpoint, "http://localhost:9000/api");
        assert_eq!(settings.token, "token");
        assert_eq!(settings.sync_interval, Duration::from_secs(60));
        assert_eq!(settings.max_concurrent_pushes, 4);
        assert!(settings.hostname.is_none());
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let argv = ["ruuvi-gateway", "--sync-interval", "soon"];
        assert!(Options::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_zero_periods_and_timeouts_are_rejected() {
        for flag in ["--sync-interval", "--online-timeout", "--request-timeout"] {
            for value in ["0", "0s", "0ms"] {
                let argv = ["ruuvi-gateway", flag, value];
                assert!(Options::try_parse_from(argv).is_err(), "{flag} {value}");
            }
        }
        let argv = ["ruuvi-gateway", "--max-concurrent-pushes", "0"];
        assert!(Options::try_parse_from(argv).is_err());

        // A zero warm-up just means the first cycle runs at once.
        assert_eq!(options(&["--warmup", "0"]).warmup, Duration::ZERO);
    }

    #[test]
    fn test_hostname_tag() {
        let gateway = || Some("gateway-1".to_string());

        let untagged = options(&[]);
        let settings = untagged
            .settings_with_hostname("token".to_string(), gateway)
            .unwrap();
        assert!(settings.hostname.is_none());

        let tagged = options(&["--hostname-tag"]);
        let settings = tagged
            .settings_with_hostname("token".to_string(), gateway)
            .unwrap();
        assert_eq!(settings.hostname.as_deref(), Some("gateway-1"));

        assert!(matches!(
            tagged.settings_with_hostname("token".to_string(), || None),
            Err(ConfigError::NoHostname)
        ));
    }

    #[test]
    fn test_select_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(dir.path().join("authorized_sensors.json"));

        // First run: no file.
        assert_eq!(select_mode(&options(&[]), &store).unwrap(), Mode::Enroll);

        store.save(&EnrollmentSet::default()).unwrap();
        assert_eq!(select_mode(&options(&[]), &store).unwrap(), Mode::Enroll);

        let set = EnrollmentSet::new(vec![record(TEST_IDENTITY, "Kitchen")]);
        store.save(&set).unwrap();
        assert_eq!(
            select_mode(&options(&[]), &store).unwrap(),
            Mode::Monitor(set)
        );
        assert_eq!(
            select_mode(&options(&["--reregister"]), &store).unwrap(),
            Mode::Enroll
        );
    }

    #[test]
    fn test_select_mode_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_sensors.json");
        std::fs::write(&path, "not json").unwrap();

        let err = select_mode(&options(&[]), &EnrollmentStore::new(path)).unwrap_err();
        assert!(matches!(err, RunError::Enrollment(EnrollmentError::Parse { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enroll_saves_and_prints() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(dir.path().join("authorized_sensors.json"));
        let scanner = FakeScanner::open(vec![
            Frame::ruuvi("CA:FE:BA:BE:12:34", canonical_payload()).with_name("Ruuvi 1234"),
        ]);

        let mut out = Vec::<u8>::new();
        let set = enroll_with_io(&options(&["--reregister"]), &scanner, &store, &mut out)
            .await
            .unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(store.load().unwrap(), Some(set));

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("Scanning for RuuviTag sensors for 10s..."));
        assert!(out.contains("Enrollment complete: 1 sensor(s)"));
        assert!(out.contains("  1. Ruuvi 1234 (CA:FE:BA:BE:12:34)\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enroll_with_nothing_found_keeps_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(dir.path().join("authorized_sensors.json"));
        let old = EnrollmentSet::new(vec![record(TEST_IDENTITY, "Kitchen")]);
        store.save(&old).unwrap();

        let mut out = Vec::<u8>::new();
        let err = enroll_with_io(&options(&[]), &FakeScanner::open(vec![]), &store, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Enrollment(EnrollmentError::NoSensorsFound)));
        assert_eq!(store.load().unwrap(), Some(old));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_delivers_only_enrolled_sensors() {
        let transport = Arc::new(FakeTransport::responding(201, "{}"));
        let sink = Arc::new(RecordingSink::default());
        let scanner = FakeScanner::open(vec![
            Frame::ruuvi("CA:FE:BA:BE:12:34", canonical_payload()),
            Frame::ruuvi("11:22:33:44:55:66", payload_for([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])),
        ]);
        let enrolled = EnrollmentSet::new(vec![record(TEST_IDENTITY, "Kitchen")]);

        // The gateway never returns while capture is running; stop it after the first sync.
        let session = run_gateway(
            monitor_settings(),
            enrolled,
            &scanner,
            Backend::Hcidump,
            transport.clone(),
            sink.clone(),
        );
        let result = tokio::time::timeout(Duration::from_secs(15), session).await;
        assert!(result.is_err());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "http://collector.test/sensors/CA:FE:BA:BE:12:34"
        );
        assert_eq!(requests[0].token, "secret-token");
        let temperature = requests[0].json()["temperature"].as_f64().unwrap();
        assert!((temperature - 2.565).abs() < 1e-9);
        assert_eq!(requests[0].json()["battery"], 2977);

        let logs = sink.logs();
        assert!(logs.contains(&"Starting sensor scan...".to_string()));
        assert!(logs.contains(&"Kitchen detected".to_string()));
        assert!(logs.contains(&"Syncing 1 sensor(s)".to_string()));
        assert!(logs.contains(&"Data sent (HTTP 201)".to_string()));
        assert_eq!(sink.liveness()[0], (0, 1));
        assert!(sink.liveness().contains(&(1, 1)));
        assert_eq!(sink.statuses(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_stops_when_capture_ends() {
        let result = run_gateway(
            monitor_settings(),
            EnrollmentSet::new(vec![record(TEST_IDENTITY, "Kitchen")]),
            &FakeScanner::new(vec![]),
            Backend::Hcidump,
            Arc::new(FakeTransport::responding(200, "")),
            Arc::new(RecordingSink::default()),
        )
        .await;

        assert!(matches!(result, Err(RunError::CaptureEnded)));
    }

    #[tokio::test]
    async fn test_gateway_reports_scan_failure() {
        struct BrokenScanner;

        impl Scanner for BrokenScanner {
            fn start_scan(
                &self,
                _backend: Backend,
            ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Frame>, ScanError>> + Send + '_>>
            {
                Box::pin(async { Err(ScanError::Bluetooth("no adapter".to_string())) })
            }
        }

        let result = run_gateway(
            monitor_settings(),
            EnrollmentSet::new(vec![record(TEST_IDENTITY, "Kitchen")]),
            &BrokenScanner,
            Backend::Hcidump,
            Arc::new(FakeTransport::responding(200, "")),
            Arc::new(RecordingSink::default()),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Bluetooth error: no adapter");
    }
}
