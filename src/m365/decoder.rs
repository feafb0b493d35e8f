//! # M365 Register Decoder
//!
//! Decodes register payloads (ESC and BMS) into typed telemetry readings.
//!
//! All multi-byte integers are little-endian. A payload shorter than its
//! register needs yields no reading; so do unknown registers and addresses.

use super::protocol::*;

/// Number of cells the BMS reports for a 10S pack
pub const MAX_CELLS: usize = 10;

/// Speed and average speed are reported in m/h
const SPEED_SCALE: f32 = 1000.0;

/// Pack voltage, current and range are reported in hundredths
const CENTI_SCALE: f32 = 100.0;

/// Frame temperature is reported in tenths of a degree
const FRAME_TEMP_SCALE: f32 = 10.0;

/// BMS temperature bytes carry a +20 °C offset
const BMS_TEMP_OFFSET: f32 = 20.0;

/// Cell voltages are reported in millivolts
const CELL_SCALE: f32 = 1000.0;

/// One decoded register value
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// km/h, direction discarded
    Speed(f32),
    /// km/h
    AverageSpeed(f32),
    /// percent
    BatteryLevel(f32),
    Mode(RideMode),
    /// metres
    Odometer(u32),
    /// metres
    TripDistance(u32),
    /// km
    RemainingRange(f32),
    /// seconds since the controller powered up
    Uptime(u32),
    /// °C
    FrameTemperature(f32),
    ErrorCode(u8),
    Headlight(bool),
    /// Combined register: amps and volts decoded from one frame
    PackCurrentVoltage { current: f32, voltage: f32 },
    /// Standalone current register, amps
    PackCurrent(f32),
    /// volts
    PackVoltage(f32),
    /// °C, two sensors
    BatteryTemperatures(f32, f32),
    /// volts, one entry per reported cell starting at cell 1
    CellVoltages(Vec<f32>),
    /// mAh
    CapacityRemaining(u16),
    /// mAh
    CapacityFull(u16),
}

/// Decode a reassembled frame
///
/// # Returns
///
/// * `Option<Reading>` - `None` for unknown addresses, frames without a
///   register selector, unknown registers or undersized payloads
pub fn decode_frame(frame: &InboundFrame) -> Option<Reading> {
    let sub_device = frame.sub_device()?;
    let register = frame.register?;
    decode_register(sub_device, register, &frame.payload)
}

/// Decode one register payload for a sub-device
pub fn decode_register(sub_device: SubDevice, register: u8, payload: &[u8]) -> Option<Reading> {
    match sub_device {
        SubDevice::Esc => decode_esc(register, payload),
        SubDevice::Bms => decode_bms(register, payload),
    }
}

fn decode_esc(register: u8, payload: &[u8]) -> Option<Reading> {
    let reading = match register {
        REG_ESC_SPEED => {
            let raw = le_i16(payload)?;
            Reading::Speed(raw.unsigned_abs() as f32 / SPEED_SCALE)
        }
        REG_ESC_AVERAGE => Reading::AverageSpeed(le_i16(payload)? as f32 / SPEED_SCALE),
        REG_ESC_BATTERY => Reading::BatteryLevel(*payload.first()? as f32),
        REG_ESC_MODE => Reading::Mode(RideMode::from_raw(*payload.first()?)),
        REG_ESC_ODOMETER => Reading::Odometer(le_u32(payload)?),
        REG_ESC_TRIP => Reading::TripDistance(le_u16(payload)? as u32),
        REG_ESC_RANGE => Reading::RemainingRange(le_u16(payload)? as f32 / CENTI_SCALE),
        REG_ESC_UPTIME => Reading::Uptime(le_u32(payload)?),
        REG_ESC_FRAME_TEMP => Reading::FrameTemperature(le_i16(payload)? as f32 / FRAME_TEMP_SCALE),
        REG_ESC_ERROR => Reading::ErrorCode(*payload.first()?),
        REG_ESC_HEADLIGHT => Reading::Headlight(payload.first()? & 0x01 != 0),
        _ => return None,
    };

    Some(reading)
}

fn decode_bms(register: u8, payload: &[u8]) -> Option<Reading> {
    let reading = match register {
        // A 4-byte read of the current register also covers the voltage register
        REG_BMS_CURRENT if payload.len() >= 4 => Reading::PackCurrentVoltage {
            current: le_i16(payload)? as f32 / CENTI_SCALE,
            voltage: le_u16(&payload[2..])? as f32 / CENTI_SCALE,
        },
        REG_BMS_CURRENT => Reading::PackCurrent(le_i16(payload)? as f32 / CENTI_SCALE),
        REG_BMS_VOLTAGE => Reading::PackVoltage(le_u16(payload)? as f32 / CENTI_SCALE),
        REG_BMS_TEMP => {
            if payload.len() < 2 {
                return None;
            }
            Reading::BatteryTemperatures(
                payload[0] as f32 - BMS_TEMP_OFFSET,
                payload[1] as f32 - BMS_TEMP_OFFSET,
            )
        }
        REG_BMS_CELLS => Reading::CellVoltages(
            payload
                .chunks_exact(2)
                .take(MAX_CELLS)
                .map(|mv| u16::from_le_bytes([mv[0], mv[1]]) as f32 / CELL_SCALE)
                .collect(),
        ),
        REG_BMS_CAPACITY => Reading::CapacityRemaining(le_u16(payload)?),
        REG_BMS_FULL_CAP => Reading::CapacityFull(le_u16(payload)?),
        _ => return None,
    };

    Some(reading)
}

fn le_u16(payload: &[u8]) -> Option<u16> {
    match payload {
        [b0, b1, ..] => Some(u16::from_le_bytes([*b0, *b1])),
        _ => None,
    }
}

fn le_i16(payload: &[u8]) -> Option<i16> {
    le_u16(payload).map(|raw| raw as i16)
}

fn le_u32(payload: &[u8]) -> Option<u32> {
    match payload {
        [b0, b1, b2, b3, ..] => Some(u32::from_le_bytes([*b0, *b1, *b2, *b3])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::m365::parser::StreamParser;
    use crate::m365::test_support::reply_frame;

    fn esc(register: u8, payload: &[u8]) -> Option<Reading> {
        decode_register(SubDevice::Esc, register, payload)
    }

    fn bms(register: u8, payload: &[u8]) -> Option<Reading> {
        decode_register(SubDevice::Bms, register, payload)
    }

    #[test]
    fn test_speed_discards_sign() {
        assert_eq!(esc(REG_ESC_SPEED, &(-1500i16).to_le_bytes()), Some(Reading::Speed(1.5)));
        assert_eq!(esc(REG_ESC_SPEED, &1500i16.to_le_bytes()), Some(Reading::Speed(1.5)));
    }

    #[test]
    fn test_speed_extreme_negative() {
        // i16::MIN has no positive counterpart in i16
        assert_eq!(
            esc(REG_ESC_SPEED, &i16::MIN.to_le_bytes()),
            Some(Reading::Speed(32.768))
        );
    }

    #[test]
    fn test_average_speed_keeps_sign() {
        assert_eq!(
            esc(REG_ESC_AVERAGE, &(-2500i16).to_le_bytes()),
            Some(Reading::AverageSpeed(-2.5))
        );
    }

    #[test]
    fn test_frame_temperature_negative() {
        assert_eq!(
            esc(REG_ESC_FRAME_TEMP, &(-200i16).to_le_bytes()),
            Some(Reading::FrameTemperature(-20.0))
        );
        assert_eq!(
            esc(REG_ESC_FRAME_TEMP, &315i16.to_le_bytes()),
            Some(Reading::FrameTemperature(31.5))
        );
    }

    #[test]
    fn test_zero_raw_decodes_to_zero() {
        let zero2 = [0u8, 0];
        let zero4 = [0u8; 4];
        assert_eq!(esc(REG_ESC_SPEED, &zero2), Some(Reading::Speed(0.0)));
        assert_eq!(esc(REG_ESC_AVERAGE, &zero2), Some(Reading::AverageSpeed(0.0)));
        assert_eq!(esc(REG_ESC_RANGE, &zero2), Some(Reading::RemainingRange(0.0)));
        assert_eq!(esc(REG_ESC_FRAME_TEMP, &zero2), Some(Reading::FrameTemperature(0.0)));
        assert_eq!(esc(REG_ESC_BATTERY, &[0]), Some(Reading::BatteryLevel(0.0)));
        assert_eq!(esc(REG_ESC_ERROR, &[0]), Some(Reading::ErrorCode(0)));
        assert_eq!(bms(REG_BMS_VOLTAGE, &zero2), Some(Reading::PackVoltage(0.0)));
        assert_eq!(bms(REG_BMS_CURRENT, &zero2), Some(Reading::PackCurrent(0.0)));
        assert_eq!(
            bms(REG_BMS_CURRENT, &zero4),
            Some(Reading::PackCurrentVoltage { current: 0.0, voltage: 0.0 })
        );
        assert_eq!(bms(REG_BMS_CELLS, &zero2), Some(Reading::CellVoltages(vec![0.0])));
    }

    #[test]
    fn test_battery_temperature_offset() {
        assert_eq!(
            bms(REG_BMS_TEMP, &[45, 0]),
            Some(Reading::BatteryTemperatures(25.0, -20.0))
        );
    }

    #[test]
    fn test_mode_remap() {
        assert_eq!(esc(REG_ESC_MODE, &[0]), Some(Reading::Mode(RideMode::Drive)));
        assert_eq!(esc(REG_ESC_MODE, &[1]), Some(Reading::Mode(RideMode::Eco)));
        assert_eq!(esc(REG_ESC_MODE, &[2]), Some(Reading::Mode(RideMode::Sport)));
        assert_eq!(esc(REG_ESC_MODE, &[6]), Some(Reading::Mode(RideMode::Sport)));
    }

    #[test]
    fn test_odometer_and_trip() {
        assert_eq!(
            esc(REG_ESC_ODOMETER, &123_456u32.to_le_bytes()),
            Some(Reading::Odometer(123_456))
        );
        assert_eq!(esc(REG_ESC_TRIP, &[0x10, 0x27]), Some(Reading::TripDistance(10_000)));
    }

    #[test]
    fn test_range_and_uptime() {
        assert_eq!(esc(REG_ESC_RANGE, &2550u16.to_le_bytes()), Some(Reading::RemainingRange(25.5)));
        assert_eq!(esc(REG_ESC_UPTIME, &3600u32.to_le_bytes()), Some(Reading::Uptime(3600)));
    }

    #[test]
    fn test_headlight_bit() {
        assert_eq!(esc(REG_ESC_HEADLIGHT, &[0x03]), Some(Reading::Headlight(true)));
        assert_eq!(esc(REG_ESC_HEADLIGHT, &[0x02]), Some(Reading::Headlight(false)));
    }

    #[test]
    fn test_undersized_payloads_ignored() {
        assert_eq!(esc(REG_ESC_SPEED, &[0x10]), None);
        assert_eq!(esc(REG_ESC_ODOMETER, &[1, 2, 3]), None);
        assert_eq!(esc(REG_ESC_BATTERY, &[]), None);
        assert_eq!(esc(REG_ESC_MODE, &[]), None);
        assert_eq!(bms(REG_BMS_CURRENT, &[0x96]), None);
        assert_eq!(bms(REG_BMS_TEMP, &[40]), None);
        assert_eq!(bms(REG_BMS_CAPACITY, &[0x01]), None);
    }

    #[test]
    fn test_unknown_registers_ignored() {
        assert_eq!(esc(REG_ESC_STATUS, &[0, 0]), None);
        assert_eq!(esc(0x99, &[0, 0]), None);
        assert_eq!(bms(REG_BMS_HEALTH, &[100, 0]), None);
    }

    #[test]
    fn test_combined_current_voltage() {
        let mut payload = 150i16.to_le_bytes().to_vec();
        payload.extend(4050u16.to_le_bytes());
        assert_eq!(
            bms(REG_BMS_CURRENT, &payload),
            Some(Reading::PackCurrentVoltage { current: 1.5, voltage: 40.5 })
        );
    }

    #[test]
    fn test_standalone_current_keeps_sign() {
        assert_eq!(
            bms(REG_BMS_CURRENT, &(-250i16).to_le_bytes()),
            Some(Reading::PackCurrent(-2.5))
        );
        // Three bytes are still the standalone path
        assert_eq!(bms(REG_BMS_CURRENT, &[0x64, 0x00, 0xFF]), Some(Reading::PackCurrent(1.0)));
    }

    #[test]
    fn test_cell_voltages() {
        let mut payload = Vec::new();
        for mv in [4100u16, 4095, 4102] {
            payload.extend(mv.to_le_bytes());
        }
        // Odd trailing byte is not a cell
        payload.push(0x10);

        assert_eq!(
            bms(REG_BMS_CELLS, &payload),
            Some(Reading::CellVoltages(vec![4.1, 4.095, 4.102]))
        );
    }

    #[test]
    fn test_cell_voltages_capped_at_ten() {
        let payload: Vec<u8> = (0..12u16).flat_map(|_| 3900u16.to_le_bytes()).collect();
        match bms(REG_BMS_CELLS, &payload) {
            Some(Reading::CellVoltages(cells)) => assert_eq!(cells.len(), MAX_CELLS),
            other => panic!("Expected cell voltages, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_frame_from_stream() {
        let mut parser = StreamParser::new();
        let frames = parser.push(&reply_frame(ADDR_BMS_REPLY, REG_BMS_CAPACITY, &[0xB8, 0x0B]));
        assert_eq!(decode_frame(&frames[0]), Some(Reading::CapacityRemaining(3000)));
    }

    #[test]
    fn test_decode_frame_unknown_address() {
        let mut parser = StreamParser::new();
        let frames = parser.push(&reply_frame(ADDR_BLE, REG_ESC_SPEED, &[0x10, 0x00]));
        assert_eq!(decode_frame(&frames[0]), None);
    }

    #[test]
    fn test_same_register_differs_per_sub_device() {
        // 0x32 is uptime on the ESC and full capacity on the BMS
        let payload = 12_800u32.to_le_bytes();
        assert_eq!(esc(REG_ESC_UPTIME, &payload), Some(Reading::Uptime(12_800)));
        assert_eq!(bms(REG_BMS_FULL_CAP, &payload), Some(Reading::CapacityFull(12_800)));
    }
}
