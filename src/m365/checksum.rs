//! # M365 Frame Checksum
//!
//! 16-bit ones'-complement of the byte sum, transmitted little-endian.
//!
//! **Coverage**: everything after the two header bytes and before the checksum
//! itself (length, address, command, register, payload).

/// Calculate the frame checksum
///
/// # Arguments
///
/// * `data` - Bytes covered by the checksum (frame without header and checksum)
///
/// # Returns
///
/// * `u16` - Bitwise NOT of the unsigned byte sum, truncated to 16 bits
///
/// # Examples
///
/// ```no_run
/// use m365_dash::m365::checksum::checksum;
///
/// let ck = checksum(&[0x03, 0x20, 0x01, 0x26, 0x02]);
/// assert_eq!(ck, 0xFFB3);
/// ```
pub fn checksum(data: &[u8]) -> u16 {
    let sum = data.iter().fold(0u32, |acc, &byte| acc + byte as u32);
    !(sum as u16)
}

/// Check the trailing checksum of a complete frame
///
/// Returns `false` for slices too short to hold header, length and checksum.
pub fn verify_frame(frame: &[u8]) -> bool {
    if frame.len() < 5 {
        return false;
    }

    let body_end = frame.len() - 2;
    let received = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    checksum(&frame[2..body_end]) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_checksum_speed_request() {
        // 0x03 + 0x20 + 0x01 + 0x26 + 0x02 = 0x4C
        let data = [0x03, 0x20, 0x01, 0x26, 0x02];
        assert_eq!(checksum(&data), 0xFFB3);
    }

    #[test]
    fn test_checksum_truncates_to_16_bits() {
        // 300 × 0xFF = 76500 = 0x12AD4, low 16 bits 0x2AD4
        let data = vec![0xFFu8; 300];
        assert_eq!(checksum(&data), !0x2AD4u16);
    }

    #[test]
    fn test_checksum_changes_with_data() {
        let ck1 = checksum(&[0x03, 0x20, 0x01, 0x26, 0x02]);
        let ck2 = checksum(&[0x03, 0x20, 0x01, 0x26, 0x04]);
        assert_ne!(ck1, ck2, "Checksum should change when data changes");
    }

    #[test]
    fn test_verify_frame() {
        let mut frame = vec![0x55, 0xAA, 0x04, 0x23, 0x01, 0x26, 0xDC, 0x05];
        let ck = checksum(&frame[2..]);
        frame.extend_from_slice(&ck.to_le_bytes());
        assert!(verify_frame(&frame));

        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(!verify_frame(&frame));
    }

    #[test]
    fn test_verify_frame_too_short() {
        assert!(!verify_frame(&[0x55, 0xAA, 0x00, 0xFF]));
    }
}
