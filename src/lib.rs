//! # M365 Dash Library
//!
//! Telemetry link for Xiaomi M365 / Mi Electric scooters over Bluetooth LE.
//!
//! This library provides the pieces a dashboard needs to talk to a scooter:
//! request framing and reply parsing for the scooter's serial protocol,
//! register decoding into a live telemetry snapshot, and a connection manager
//! that scans, connects and polls registers on a fixed tick.

pub mod config;
pub mod error;
pub mod link;
pub mod m365;
pub mod telemetry;
