//! `ruuvi-gateway` library.
//!
//! The binary (`src/main.rs`) is responsible for process setup and exit codes.
//! The core lives in [`crate::app`] and the modules it wires together, where
//! it can be tested deterministically with an injected scanner, transport and
//! status sink.

pub mod app;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod enrollment;
pub mod ingest;
pub mod liveness;
pub mod logging;
pub mod mac_address;
pub mod reading;
pub mod scanner;
pub mod scheduler;
pub mod sink;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Options, RunError, Scanner};
pub use cache::ReadingCache;
pub use config::{Settings, parse_duration};
pub use decoder::{DecodeError, Frame, decode_frame, decode_payload, is_sensor_frame};
pub use delivery::{DeliveryClient, DeliveryOutcome, HttpTransport, Transport};
pub use enrollment::{Authorization, EnrollmentRecord, EnrollmentSet, EnrollmentStore};
pub use ingest::Ingestor;
pub use liveness::{LivenessCounts, LivenessTable};
pub use mac_address::MacAddress;
pub use reading::Reading;
pub use scanner::{Backend, ScanError};
pub use scheduler::Scheduler;
pub use sink::{DisplayMode, LogSink, StatusSink, TerminalSink};
