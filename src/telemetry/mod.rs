//! # Telemetry Module
//!
//! Holds the decoded scooter state and logs it to JSONL files with rotation.
//!
//! This module handles:
//! - Applying decoded register readings to the telemetry snapshot
//! - Derived cell statistics and the fallback range estimate
//! - Formatting snapshots as JSONL (JSON Lines)
//! - Managing file rotation (max N records per file, last M files kept)

pub mod recorder;
pub mod snapshot;

pub use recorder::TelemetryRecorder;
pub use snapshot::TelemetrySnapshot;
