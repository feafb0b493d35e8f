//! # M365 Protocol Module
//!
//! Implementation of the Xiaomi M365 / Ninebot serial protocol as tunnelled
//! over the dashboard's BLE UART service.
//!
//! This module handles:
//! - Register read request encoding (9-byte frames)
//! - Notification stream reassembly and resynchronization
//! - Register payload decoding into telemetry readings
//! - 16-bit ones'-complement checksum calculation

pub mod protocol;
pub mod encoder;
pub mod parser;
pub mod decoder;
pub mod checksum;

#[cfg(test)]
pub(crate) mod test_support {
    use super::checksum::checksum;
    use super::protocol::*;

    /// Build a controller reply carrying `payload` for `register`
    pub(crate) fn reply_frame(address: u8, register: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![
            M365_HEADER_0,
            M365_HEADER_1,
            (payload.len() + 2) as u8,
            address,
            CMD_READ,
            register,
        ];
        frame.extend_from_slice(payload);
        let ck = checksum(&frame[2..]);
        frame.extend_from_slice(&ck.to_le_bytes());
        frame
    }
}
