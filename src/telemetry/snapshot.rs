//! Telemetry snapshot: the most recently decoded value of every field.
//!
//! Fields are updated one register at a time as frames arrive; there is no
//! consistency guarantee across fields.

use serde::Serialize;

use crate::m365::decoder::{Reading, MAX_CELLS};
use crate::m365::protocol::RideMode;

/// Cells at or below this voltage are treated as not yet reported
pub const CELL_PRESENT_THRESHOLD: f32 = 0.1;

/// Full pack capacity assumed until the BMS reports one (mAh)
pub const DEFAULT_CAPACITY_FULL: u16 = 12_800;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    // Core telemetry
    pub speed: f32,
    pub average_speed: f32,
    pub battery_level: f32,
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
    pub odometer: u32,
    pub trip_distance: u32,
    /// Seconds since the link came up
    pub ride_time: u32,
    pub remaining_range: f32,
    /// `true` while `remaining_range` is the battery-based estimate
    pub range_estimated: bool,
    /// Controller uptime as reported by the ESC
    pub uptime: u32,

    // Temperature
    pub temperature: f32,
    pub temp_esc: f32,
    pub temp_bms1: f32,
    pub temp_bms2: f32,

    // Battery capacity
    pub capacity_remaining: u16,
    pub capacity_full: u16,

    // Cell voltages, 0.0 until reported
    pub cell_voltages: [f32; MAX_CELLS],
    pub cell_count: u8,
    pub min_cell_voltage: f32,
    pub max_cell_voltage: f32,
    pub cell_imbalance: f32,

    // Status
    pub is_charging: bool,
    pub is_locked: bool,
    pub error_code: u8,
    pub mode: Option<RideMode>,
    pub headlight: bool,
    pub taillight: bool,

    // Connection
    pub connected: bool,
    pub rssi: i16,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            speed: 0.0,
            average_speed: 0.0,
            battery_level: 0.0,
            voltage: 0.0,
            current: 0.0,
            power: 0.0,
            odometer: 0,
            trip_distance: 0,
            ride_time: 0,
            remaining_range: 0.0,
            range_estimated: false,
            uptime: 0,
            temperature: 0.0,
            temp_esc: 0.0,
            temp_bms1: 0.0,
            temp_bms2: 0.0,
            capacity_remaining: 0,
            capacity_full: DEFAULT_CAPACITY_FULL,
            cell_voltages: [0.0; MAX_CELLS],
            cell_count: MAX_CELLS as u8,
            min_cell_voltage: 0.0,
            max_cell_voltage: 0.0,
            cell_imbalance: 0.0,
            is_charging: false,
            is_locked: false,
            error_code: 0,
            mode: None,
            headlight: false,
            taillight: false,
            connected: false,
            rssi: 0,
        }
    }
}

impl TelemetrySnapshot {
    /// Write one decoded reading into its field(s)
    ///
    /// The two current paths derive power differently: the combined frame uses
    /// the magnitude of the current, the standalone register keeps its sign and
    /// multiplies by the last known voltage. Regen therefore shows as negative
    /// power only on the standalone path.
    pub fn apply(&mut self, reading: Reading) {
        match reading {
            Reading::Speed(kmh) => self.speed = kmh,
            Reading::AverageSpeed(kmh) => self.average_speed = kmh,
            Reading::BatteryLevel(percent) => self.battery_level = percent,
            Reading::Mode(mode) => self.mode = Some(mode),
            Reading::Odometer(m) => self.odometer = m,
            Reading::TripDistance(m) => self.trip_distance = m,
            Reading::RemainingRange(km) => {
                self.remaining_range = km;
                self.range_estimated = false;
            }
            Reading::Uptime(s) => self.uptime = s,
            Reading::FrameTemperature(celsius) => {
                self.temp_esc = celsius;
                self.temperature = celsius;
            }
            Reading::ErrorCode(code) => self.error_code = code,
            Reading::Headlight(on) => self.headlight = on,
            Reading::PackCurrentVoltage { current, voltage } => {
                self.current = current;
                self.voltage = voltage;
                self.power = voltage * current.abs();
            }
            Reading::PackCurrent(amps) => {
                self.current = amps;
                self.power = self.voltage * amps;
            }
            Reading::PackVoltage(volts) => self.voltage = volts,
            Reading::BatteryTemperatures(t1, t2) => {
                self.temp_bms1 = t1;
                self.temp_bms2 = t2;
            }
            Reading::CellVoltages(cells) => {
                for (slot, volts) in self.cell_voltages.iter_mut().zip(cells) {
                    *slot = volts;
                }
                self.update_cell_stats();
            }
            Reading::CapacityRemaining(mah) => self.capacity_remaining = mah,
            Reading::CapacityFull(mah) => self.capacity_full = mah,
        }
    }

    /// Recompute min/max/imbalance over the cells that have reported
    fn update_cell_stats(&mut self) {
        let present = self
            .cell_voltages
            .iter()
            .copied()
            .filter(|&v| v > CELL_PRESENT_THRESHOLD);

        let (min, max) = present.fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
            (min.min(v), max.max(v))
        });

        if min.is_finite() {
            self.min_cell_voltage = min;
            self.max_cell_voltage = max;
            self.cell_imbalance = max - min;
        } else {
            self.min_cell_voltage = 0.0;
            self.max_cell_voltage = 0.0;
            self.cell_imbalance = 0.0;
        }
    }

    /// Substitute a battery-based range until the ESC reports one
    pub fn estimate_range(&mut self, km_per_percent: f32) {
        if self.remaining_range_reported() {
            return;
        }
        self.remaining_range = self.battery_level * km_per_percent;
        self.range_estimated = true;
    }

    fn remaining_range_reported(&self) -> bool {
        !self.range_estimated && self.remaining_range > 0.0
    }

    /// Number of cells that have reported a voltage
    pub fn reported_cells(&self) -> usize {
        self.cell_voltages
            .iter()
            .filter(|&&v| v > CELL_PRESENT_THRESHOLD)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let snapshot = TelemetrySnapshot::default();
        assert_eq!(snapshot.capacity_full, 12_800);
        assert_eq!(snapshot.cell_count, 10);
        assert_eq!(snapshot.mode, None);
        assert!(!snapshot.connected);
        assert_eq!(snapshot.reported_cells(), 0);
    }

    #[test]
    fn test_battery_update_leaves_other_fields() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::Speed(12.5));
        snapshot.apply(Reading::PackCurrentVoltage { current: 3.0, voltage: 40.0 });
        snapshot.apply(Reading::Mode(RideMode::Sport));
        let before = snapshot.clone();

        snapshot.apply(Reading::BatteryLevel(77.0));

        assert_eq!(snapshot.battery_level, 77.0);
        let mut expected = before;
        expected.battery_level = 77.0;
        assert_eq!(snapshot, expected);
    }

    #[test]
    fn test_combined_power_uses_magnitude() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::PackCurrentVoltage { current: 1.5, voltage: 40.5 });
        assert_eq!(snapshot.current, 1.5);
        assert_eq!(snapshot.voltage, 40.5);
        assert_eq!(snapshot.power, 60.75);

        snapshot.apply(Reading::PackCurrentVoltage { current: -1.5, voltage: 40.5 });
        assert_eq!(snapshot.power, 60.75);
    }

    #[test]
    fn test_standalone_current_power_keeps_sign() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::PackVoltage(40.0));
        snapshot.apply(Reading::PackCurrent(-2.0));
        assert_eq!(snapshot.current, -2.0);
        assert_eq!(snapshot.power, -80.0);
    }

    #[test]
    fn test_standalone_voltage_leaves_power() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::PackCurrentVoltage { current: 2.0, voltage: 40.0 });
        snapshot.apply(Reading::PackVoltage(41.0));
        assert_eq!(snapshot.voltage, 41.0);
        assert_eq!(snapshot.power, 80.0);
    }

    #[test]
    fn test_frame_temperature_mirrors_into_temperature() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::FrameTemperature(-20.0));
        assert_eq!(snapshot.temp_esc, -20.0);
        assert_eq!(snapshot.temperature, -20.0);
    }

    #[test]
    fn test_cell_stats_ignore_unreported_cells() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::CellVoltages(vec![4.0, 4.2, 0.05, 3.9]));

        assert_eq!(snapshot.reported_cells(), 3);
        assert_eq!(snapshot.min_cell_voltage, 3.9);
        assert_eq!(snapshot.max_cell_voltage, 4.2);
        assert!((snapshot.cell_imbalance - 0.3).abs() < 1e-6);
        assert_eq!(snapshot.cell_voltages[4], 0.0);
    }

    #[test]
    fn test_partial_cell_report_keeps_later_cells() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::CellVoltages(vec![4.0; MAX_CELLS]));
        snapshot.apply(Reading::CellVoltages(vec![3.5, 3.6]));

        assert_eq!(snapshot.cell_voltages[0], 3.5);
        assert_eq!(snapshot.cell_voltages[1], 3.6);
        assert_eq!(snapshot.cell_voltages[9], 4.0);
        assert_eq!(snapshot.min_cell_voltage, 3.5);
        assert_eq!(snapshot.max_cell_voltage, 4.0);
    }

    #[test]
    fn test_cell_stats_with_no_reported_cells() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::CellVoltages(vec![0.0, 0.0]));
        assert_eq!(snapshot.min_cell_voltage, 0.0);
        assert_eq!(snapshot.max_cell_voltage, 0.0);
        assert_eq!(snapshot.cell_imbalance, 0.0);
    }

    #[test]
    fn test_range_estimate_until_reported() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::BatteryLevel(60.0));
        snapshot.estimate_range(0.45);
        assert_eq!(snapshot.remaining_range, 60.0 * 0.45);
        assert!(snapshot.range_estimated);

        // Estimate follows the battery level
        snapshot.apply(Reading::BatteryLevel(50.0));
        snapshot.estimate_range(0.45);
        assert_eq!(snapshot.remaining_range, 50.0 * 0.45);

        snapshot.apply(Reading::RemainingRange(18.2));
        snapshot.estimate_range(0.45);
        assert_eq!(snapshot.remaining_range, 18.2);
        assert!(!snapshot.range_estimated);
    }

    #[test]
    fn test_reported_zero_range_falls_back_to_estimate() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::BatteryLevel(10.0));
        snapshot.apply(Reading::RemainingRange(0.0));
        snapshot.estimate_range(0.45);
        assert_eq!(snapshot.remaining_range, 10.0 * 0.45);
    }

    #[test]
    fn test_serializes_mode_as_name() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.apply(Reading::Mode(RideMode::Eco));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["mode"], "eco");
        assert_eq!(json["capacity_full"], 12_800);
    }
}
