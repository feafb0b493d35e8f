//! # Poll Scheduler
//!
//! Round-robin register polling over a single link.
//!
//! One cycle is 16 slots. Slots 0, 4, 8 and 12 read the speed register so
//! motion data refreshes four times per cycle; every other slot reads one
//! register (or a named batch) once per cycle. At the nominal 100ms slot
//! interval a full cycle takes 1.6s.

use std::time::{Duration, Instant};

use crate::m365::protocol::*;
use crate::telemetry::TelemetrySnapshot;

/// Number of slots in one poll cycle
pub const POLL_CYCLE_LEN: usize = 16;

/// Multi-register reads issued as one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batch {
    /// ESC block starting at the battery register
    EscSummary,
    /// BMS current followed by voltage
    PackElectrical,
    /// All BMS cell voltages
    CellVoltages,
}

impl Batch {
    pub fn request(self) -> RequestFrame {
        match self {
            Batch::EscSummary => RequestFrame::read(SubDevice::Esc, REG_ESC_BATTERY, 0x14),
            Batch::PackElectrical => RequestFrame::read(SubDevice::Bms, REG_BMS_CURRENT, 0x04),
            Batch::CellVoltages => RequestFrame::read(SubDevice::Bms, REG_BMS_CELLS, 0x14),
        }
    }
}

/// What one poll slot asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSlot {
    Register(RequestFrame),
    Batch(Batch),
}

impl PollSlot {
    pub fn request(self) -> RequestFrame {
        match self {
            PollSlot::Register(request) => request,
            PollSlot::Batch(batch) => batch.request(),
        }
    }
}

const SPEED: PollSlot = PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_SPEED, 2));

/// The fixed poll cycle
pub const POLL_TABLE: [PollSlot; POLL_CYCLE_LEN] = [
    SPEED,
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_BATTERY, 1)),
    PollSlot::Batch(Batch::PackElectrical),
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_MODE, 1)),
    SPEED,
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_ODOMETER, 4)),
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_TRIP, 2)),
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_FRAME_TEMP, 2)),
    SPEED,
    PollSlot::Register(RequestFrame::read(SubDevice::Bms, REG_BMS_TEMP, 2)),
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_RANGE, 2)),
    PollSlot::Register(RequestFrame::read(SubDevice::Bms, REG_BMS_CAPACITY, 2)),
    SPEED,
    PollSlot::Batch(Batch::CellVoltages),
    PollSlot::Register(RequestFrame::read(SubDevice::Esc, REG_ESC_AVERAGE, 2)),
    PollSlot::Register(RequestFrame::read(SubDevice::Bms, REG_BMS_FULL_CAP, 2)),
];

/// Decides which request goes out on each tick and when the RSSI is due
#[derive(Debug)]
pub struct PollScheduler {
    slot: usize,
    poll_interval: Duration,
    rssi_interval: Duration,
    range_km_per_percent: f32,
    last_poll: Option<Instant>,
    last_rssi: Option<Instant>,
}

impl PollScheduler {
    pub fn new(poll_interval: Duration, rssi_interval: Duration, range_km_per_percent: f32) -> Self {
        Self {
            slot: 0,
            poll_interval,
            rssi_interval,
            range_km_per_percent,
            last_poll: None,
            last_rssi: None,
        }
    }

    /// Slot the next poll will use
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Return the next request if the poll interval has elapsed
    ///
    /// The slot index survives disconnects, so a new link resumes the cycle
    /// where the previous one stopped.
    pub fn poll(&mut self, now: Instant) -> Option<RequestFrame> {
        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last) < self.poll_interval {
                return None;
            }
        }

        self.last_poll = Some(now);
        Some(self.advance())
    }

    /// Take the current slot's request and move to the next slot
    pub fn advance(&mut self) -> RequestFrame {
        let request = POLL_TABLE[self.slot].request();
        self.slot = (self.slot + 1) % POLL_CYCLE_LEN;
        request
    }

    /// Whether the signal strength should be refreshed now
    pub fn rssi_due(&mut self, now: Instant) -> bool {
        match self.last_rssi {
            Some(last) if now.saturating_duration_since(last) < self.rssi_interval => false,
            _ => {
                self.last_rssi = Some(now);
                true
            }
        }
    }

    /// Restart the RSSI timer, e.g. after sampling it on connect
    pub fn mark_rssi(&mut self, now: Instant) {
        self.last_rssi = Some(now);
    }

    /// Fill in fields derived from elapsed time and fallbacks
    pub fn derive_fields(&self, snapshot: &mut TelemetrySnapshot, connected_at: Instant, now: Instant) {
        snapshot.ride_time = now.saturating_duration_since(connected_at).as_secs() as u32;
        snapshot.estimate_range(self.range_km_per_percent);
    }
}
