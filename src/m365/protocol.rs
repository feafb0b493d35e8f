//! # M365 Protocol Constants and Types
//!
//! Core protocol definitions for the M365 scooter serial-over-BLE protocol.

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

/// First frame header byte (always 0x55)
pub const M365_HEADER_0: u8 = 0x55;

/// Second frame header byte (always 0xAA)
pub const M365_HEADER_1: u8 = 0xAA;

/// Length tag carried by every outbound read request
///
/// The tag is fixed regardless of how many bytes are being requested.
pub const M365_REQUEST_LENGTH_TAG: u8 = 0x03;

/// Outbound request frame size: header(2) + len(1) + addr(1) + cmd(1) + reg(1) + size(1) + checksum(2)
pub const M365_REQUEST_FRAME_SIZE: usize = 9;

/// Bytes of an inbound frame not covered by the declared length:
/// header(2) + len(1) + addr(1) + checksum(2)
pub const M365_FRAME_OVERHEAD: usize = 6;

/// Offset of the declared length byte
pub const M365_LENGTH_OFFSET: usize = 2;

/// Offset of the sub-device address byte
pub const M365_ADDRESS_OFFSET: usize = 3;

/// Offset of the command byte
pub const M365_COMMAND_OFFSET: usize = 4;

/// Offset of the register byte (only present when declared length > 1)
pub const M365_REGISTER_OFFSET: usize = 5;

/// Offset of the first payload byte
pub const M365_PAYLOAD_OFFSET: usize = 6;

/// Hard bound on the receive accumulation buffer
pub const M365_RX_BUFFER_CAPACITY: usize = 256;

/// Request addresses
pub const ADDR_ESC: u8 = 0x20;
pub const ADDR_BLE: u8 = 0x21;
pub const ADDR_BMS: u8 = 0x22;

/// Response addresses (controller → app)
pub const ADDR_ESC_REPLY: u8 = 0x23;
pub const ADDR_BMS_REPLY: u8 = 0x25;

/// Commands
pub const CMD_READ: u8 = 0x01;
pub const CMD_WRITE: u8 = 0x03;

/// ESC registers
pub const REG_ESC_ERROR: u8 = 0x1B;
pub const REG_ESC_ALARM: u8 = 0x1C;
pub const REG_ESC_STATUS: u8 = 0x1D;
pub const REG_ESC_MODE: u8 = 0x1F;
pub const REG_ESC_HEADLIGHT: u8 = 0x21;
pub const REG_ESC_BATTERY: u8 = 0x22;
pub const REG_ESC_RANGE: u8 = 0x25;
pub const REG_ESC_SPEED: u8 = 0x26;
pub const REG_ESC_ODOMETER: u8 = 0x29;
pub const REG_ESC_TRIP: u8 = 0x2F;
pub const REG_ESC_UPTIME: u8 = 0x32;
pub const REG_ESC_FRAME_TEMP: u8 = 0x3E;
pub const REG_ESC_AVERAGE: u8 = 0x65;

/// BMS registers
pub const REG_BMS_CAPACITY: u8 = 0x31;
pub const REG_BMS_FULL_CAP: u8 = 0x32;
pub const REG_BMS_CURRENT: u8 = 0x33;
pub const REG_BMS_VOLTAGE: u8 = 0x34;
pub const REG_BMS_TEMP: u8 = 0x35;
pub const REG_BMS_HEALTH: u8 = 0x3B;
pub const REG_BMS_CELLS: u8 = 0x40;

/// Nordic UART style service exposed by the scooter dashboard
pub const M365_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Characteristic the app writes request frames to
pub const M365_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Characteristic the scooter notifies response fragments on
pub const M365_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Onboard controller a frame is addressed to or comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubDevice {
    /// Motor/speed controller
    Esc,
    /// Battery management system
    Bms,
}

impl SubDevice {
    /// Address used when sending a request to this sub-device
    pub fn request_address(self) -> u8 {
        match self {
            SubDevice::Esc => ADDR_ESC,
            SubDevice::Bms => ADDR_BMS,
        }
    }

    /// Map a response address back to its sub-device
    ///
    /// Returns `None` for addresses this client does not decode
    /// (BLE dashboard chatter, echoes of our own requests).
    pub fn from_reply_address(address: u8) -> Option<Self> {
        match address {
            ADDR_ESC_REPLY => Some(SubDevice::Esc),
            ADDR_BMS_REPLY => Some(SubDevice::Bms),
            _ => None,
        }
    }
}

/// Request command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read,
    Write,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        match self {
            Command::Read => CMD_READ,
            Command::Write => CMD_WRITE,
        }
    }
}

/// Outbound request: ask `target` for `length` bytes starting at `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    pub target: SubDevice,
    pub command: Command,
    pub register: u8,
    pub length: u8,
}

impl RequestFrame {
    /// Build a read request
    pub const fn read(target: SubDevice, register: u8, length: u8) -> Self {
        Self {
            target,
            command: Command::Read,
            register,
            length,
        }
    }
}

/// Complete frame reassembled from the notification stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Raw address byte as received
    pub address: u8,

    /// Raw command byte
    pub command: u8,

    /// Register selector; `None` when the declared length is 1 or less
    pub register: Option<u8>,

    /// Declared length byte (payload length + 2)
    pub declared_len: u8,

    /// Payload bytes following the register selector
    pub payload: Bytes,
}

impl InboundFrame {
    /// Sub-device this frame came from, if it is one we decode
    pub fn sub_device(&self) -> Option<SubDevice> {
        SubDevice::from_reply_address(self.address)
    }
}

/// Riding mode as reported to consumers
///
/// The numeric values are the externally reported mode numbers, which do not
/// match the raw register encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RideMode {
    Eco = 0,
    Drive = 1,
    Sport = 2,
}

impl RideMode {
    /// Remap the 2-bit raw mode field
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => RideMode::Drive,
            1 => RideMode::Eco,
            _ => RideMode::Sport,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(M365_HEADER_0, 0x55);
        assert_eq!(M365_HEADER_1, 0xAA);
        assert_eq!(M365_REQUEST_LENGTH_TAG, 0x03);
        assert_eq!(M365_REQUEST_FRAME_SIZE, 9);
        assert_eq!(M365_FRAME_OVERHEAD, 6);
    }

    #[test]
    fn test_sub_device_addresses() {
        assert_eq!(SubDevice::Esc.request_address(), 0x20);
        assert_eq!(SubDevice::Bms.request_address(), 0x22);
        assert_eq!(SubDevice::from_reply_address(0x23), Some(SubDevice::Esc));
        assert_eq!(SubDevice::from_reply_address(0x25), Some(SubDevice::Bms));
        // Requests echoed back and BLE chatter are not decoded
        assert_eq!(SubDevice::from_reply_address(ADDR_ESC), None);
        assert_eq!(SubDevice::from_reply_address(ADDR_BLE), None);
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Read.as_byte(), 0x01);
        assert_eq!(Command::Write.as_byte(), 0x03);
    }

    #[test]
    fn test_ride_mode_remap() {
        assert_eq!(RideMode::from_raw(0), RideMode::Drive);
        assert_eq!(RideMode::from_raw(1), RideMode::Eco);
        assert_eq!(RideMode::from_raw(2), RideMode::Sport);
        assert_eq!(RideMode::from_raw(3), RideMode::Sport);
        // Only the low two bits count
        assert_eq!(RideMode::from_raw(0xFC), RideMode::Drive);
        assert_eq!(RideMode::Drive.number(), 1);
        assert_eq!(RideMode::Eco.number(), 0);
    }

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            M365_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            M365_RX_CHAR_UUID.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }
}
