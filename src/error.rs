//! # Error Types
//!
//! Custom error types for M365 Dash using `thiserror`.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for M365 Dash
#[derive(Debug, Error)]
pub enum DashError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bluetooth stack errors
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Transport-level failures that are not raised by the BLE stack itself
    #[error("Transport error: {0}")]
    Transport(String),

    /// The scooter service was not exposed by the connected peer
    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    /// A required characteristic was missing from the scooter service
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// `connect()` called without a discovered peer
    #[error("No discovered peer to connect to")]
    NoPeer,

    /// A request was issued while the link was not ready
    #[error("Link is not ready for requests")]
    NotReady,

    /// Telemetry record serialization errors
    #[error("Telemetry serialization error: {0}")]
    Telemetry(#[from] serde_json::Error),
}

/// Result type alias for M365 Dash
pub type Result<T> = std::result::Result<T, DashError>;
