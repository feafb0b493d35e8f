//! # M365 Request Encoder
//!
//! Encodes register requests into 9-byte M365 frames.

use super::checksum::checksum;
use super::protocol::*;

/// Encode a request into a complete M365 frame
///
/// # Arguments
///
/// * `request` - Target sub-device, command, register and requested length
///
/// # Returns
///
/// * `[u8; 9]` - header(2) + length tag + address + command + register + length + checksum(2)
///
/// # Examples
///
/// ```no_run
/// use m365_dash::m365::encoder::encode_request;
/// use m365_dash::m365::protocol::{RequestFrame, SubDevice, REG_ESC_SPEED};
///
/// let frame = encode_request(&RequestFrame::read(SubDevice::Esc, REG_ESC_SPEED, 2));
/// assert_eq!(frame, [0x55, 0xAA, 0x03, 0x20, 0x01, 0x26, 0x02, 0xB3, 0xFF]);
/// ```
pub fn encode_request(request: &RequestFrame) -> [u8; M365_REQUEST_FRAME_SIZE] {
    encode(
        request.target.request_address(),
        request.command.as_byte(),
        request.register,
        request.length,
    )
}

/// Encode raw request fields into a frame
///
/// The length tag at byte 2 is always [`M365_REQUEST_LENGTH_TAG`]; `length`
/// only selects how many register bytes the controller should return.
pub fn encode(address: u8, command: u8, register: u8, length: u8) -> [u8; M365_REQUEST_FRAME_SIZE] {
    let mut frame = [0u8; M365_REQUEST_FRAME_SIZE];
    frame[0] = M365_HEADER_0;
    frame[1] = M365_HEADER_1;
    frame[2] = M365_REQUEST_LENGTH_TAG;
    frame[3] = address;
    frame[4] = command;
    frame[5] = register;
    frame[6] = length;

    let ck = checksum(&frame[2..7]);
    frame[7..9].copy_from_slice(&ck.to_le_bytes());

    frame
}
