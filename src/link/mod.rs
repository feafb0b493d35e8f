//! # Scooter Link Module
//!
//! Owns the connection lifecycle and the poll loop for one scooter.
//!
//! This module handles:
//! - Scanning for a scooter by advertised name and connecting to it
//! - Resolving the UART service and arming RX notifications
//! - Round-robin register polling on a fixed tick
//! - Reassembling and decoding notifications into the telemetry snapshot
//! - Falling back to Disconnected and rescanning on any failure
//!
//! All state is mutated from `update()`. The transport never touches the
//! snapshot: it queues discoveries and notification chunks on a channel that
//! `update()` drains.

pub mod ble;
pub mod scheduler;
pub mod transport;

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::{BleConfig, Config};
use crate::error::{DashError, Result};
use crate::m365::decoder::decode_frame;
use crate::m365::encoder::encode_request;
use crate::m365::parser::{ParserStats, StreamParser};
use crate::m365::protocol::RequestFrame;
use crate::telemetry::TelemetrySnapshot;

pub use scheduler::{Batch, PollScheduler, PollSlot};
pub use transport::{event_channel, DiscoveredPeer, EventReceiver, EventSender, LinkEvent, Transport};

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    /// Reserved for a credential exchange; accepts requests like `Connected`
    Authenticated,
}

impl ConnectionState {
    /// Status text shown by the dashboard while not riding
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Scanning => "SCANNING...",
            ConnectionState::Connecting => "CONNECTING...",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Authenticated => "READY",
        }
    }

    /// Whether requests may be sent in this state
    pub fn is_ready(self) -> bool {
        match self {
            ConnectionState::Connected | ConnectionState::Authenticated => true,
            ConnectionState::Disconnected | ConnectionState::Scanning | ConnectionState::Connecting => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State and telemetry as published after every update
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub snapshot: TelemetrySnapshot,
}

/// Drives one scooter link from a periodic tick
pub struct ConnectionManager<T: Transport> {
    transport: T,
    events: EventReceiver,
    state: ConnectionState,
    peer: Option<DiscoveredPeer>,
    parser: StreamParser,
    scheduler: PollScheduler,
    snapshot: TelemetrySnapshot,
    status_tx: watch::Sender<LinkStatus>,
    ble: BleConfig,
    started: bool,
    last_scan_attempt: Option<Instant>,
    connected_at: Option<Instant>,
    connect_timeout: Duration,
    rssi: i16,
}

impl<T: Transport> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("slot", &self.scheduler.slot())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager around a transport and the receiving end of its event channel
    pub fn new(transport: T, events: EventReceiver, config: &Config) -> Self {
        let snapshot = TelemetrySnapshot::default();
        let (status_tx, _) = watch::channel(LinkStatus {
            state: ConnectionState::Disconnected,
            snapshot: snapshot.clone(),
        });

        Self {
            transport,
            events,
            state: ConnectionState::Disconnected,
            peer: None,
            parser: StreamParser::with_checksum_verification(config.protocol.verify_checksum),
            scheduler: PollScheduler::new(
                Duration::from_millis(config.poll.interval_ms),
                Duration::from_millis(config.ble.rssi_interval_ms),
                config.estimates.range_km_per_percent,
            ),
            snapshot,
            status_tx,
            ble: config.ble.clone(),
            started: false,
            last_scan_attempt: None,
            connected_at: None,
            connect_timeout: Duration::from_secs(config.ble.connect_timeout_s),
            rssi: 0,
        }
    }

    /// Initialise the link and start scanning
    ///
    /// Calling it again while the link is active does nothing.
    pub async fn begin(&mut self) {
        self.begin_at(Instant::now()).await
    }

    pub async fn begin_at(&mut self, now: Instant) {
        if self.started && self.state != ConnectionState::Disconnected {
            return;
        }
        if !self.started {
            info!("Link init");
            self.started = true;
        }
        self.start_scan(now).await;
        self.publish();
    }

    /// Advance the state machine and the poll schedule by one tick
    pub async fn update(&mut self) {
        self.update_at(Instant::now()).await
    }

    pub async fn update_at(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Disconnected => {
                let backoff = Duration::from_millis(self.ble.rescan_interval_ms);
                let due = self
                    .last_scan_attempt
                    .map_or(true, |last| now.saturating_duration_since(last) > backoff);
                if due {
                    self.start_scan(now).await;
                }
            }
            ConnectionState::Scanning => {
                let limit = Duration::from_secs(self.ble.scan_duration_s);
                let started = self.last_scan_attempt.unwrap_or(now);
                if now.saturating_duration_since(started) >= limit {
                    info!("Scan finished without finding a scooter");
                    if let Err(e) = self.transport.stop_scan().await {
                        debug!("Failed to stop scan: {}", e);
                    }
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            ConnectionState::Connecting => {
                if self.peer.is_some() {
                    // Failure is logged and already returned us to Disconnected
                    let _ = self.connect_at(now).await;
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            ConnectionState::Connected | ConnectionState::Authenticated => {
                if self.transport.is_connected().await {
                    self.service_link(now).await;
                } else {
                    warn!("Link lost");
                    self.drop_link();
                }
            }
        }

        self.drain_events().await;
        self.publish();
    }

    /// Connect to the peer found by the last scan
    ///
    /// # Errors
    ///
    /// Returns [`DashError::NoPeer`] without changing state if nothing has been
    /// discovered. Any transport or resolution failure tears the link down,
    /// leaves the manager `Disconnected` and is returned.
    pub async fn connect(&mut self) -> Result<()> {
        self.connect_at(Instant::now()).await
    }

    pub async fn connect_at(&mut self, now: Instant) -> Result<()> {
        let peer = self.peer.clone().ok_or(DashError::NoPeer)?;

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {} ({})", peer.name, peer.id);

        if let Err(e) = self.establish(&peer).await {
            warn!("Connection to {} failed: {}", peer.name, e);
            if self.transport.is_connected().await {
                if let Err(e) = self.transport.disconnect().await {
                    debug!("Teardown after failed connect: {}", e);
                }
            }
            self.peer = None;
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        self.parser.reset();
        self.rssi = match self.transport.rssi().await {
            Ok(Some(rssi)) => rssi,
            Ok(None) => peer.rssi.unwrap_or(0),
            Err(e) => {
                debug!("RSSI unavailable on connect: {}", e);
                peer.rssi.unwrap_or(0)
            }
        };
        self.scheduler.mark_rssi(now);
        self.snapshot.connected = true;
        self.snapshot.rssi = self.rssi;
        self.connected_at = Some(now);
        self.set_state(ConnectionState::Connected);
        info!("Ready (RSSI {} dBm)", self.rssi);

        self.publish();
        Ok(())
    }

    /// Connect, resolve and subscribe within one `connect_timeout` budget
    async fn establish(&mut self, peer: &DiscoveredPeer) -> Result<()> {
        let limit = self.connect_timeout;
        match tokio::time::timeout(limit, self.establish_steps(peer)).await {
            Ok(result) => result,
            Err(_) => Err(DashError::Transport(format!(
                "Link setup with {} timed out after {:?}",
                peer.id, limit
            ))),
        }
    }

    async fn establish_steps(&mut self, peer: &DiscoveredPeer) -> Result<()> {
        self.transport.connect(peer).await?;
        self.transport.resolve().await?;
        self.transport.subscribe().await?;
        Ok(())
    }

    /// Close the link and return to `Disconnected`
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Scanning {
            if let Err(e) = self.transport.stop_scan().await {
                debug!("Failed to stop scan: {}", e);
            }
        }
        if self.transport.is_connected().await {
            if let Err(e) = self.transport.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        }
        self.drop_link();
        self.publish();
    }

    /// Promote a connected link to `Authenticated`
    pub fn mark_authenticated(&mut self) {
        if self.state == ConnectionState::Connected {
            self.set_state(ConnectionState::Authenticated);
        }
    }

    /// Send one request if the link is ready
    pub async fn send_request(&mut self, request: &RequestFrame) -> Result<()> {
        if !self.state.is_ready() {
            return Err(DashError::NotReady);
        }
        let frame = encode_request(request);
        trace!("TX {:02X?}", frame);
        self.transport.write(&frame).await
    }

    /// Send one of the named multi-register reads
    pub async fn request_batch(&mut self, batch: Batch) -> Result<()> {
        self.send_request(&batch.request()).await
    }

    /// Copy of the current telemetry
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_ready()
    }

    /// Last sampled signal strength in dBm
    pub fn signal_strength(&self) -> i16 {
        self.rssi
    }

    /// Receiver for the status published after every update
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    pub fn peer(&self) -> Option<&DiscoveredPeer> {
        self.peer.as_ref()
    }

    /// When the current link came up
    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    pub fn parser_stats(&self) -> ParserStats {
        self.parser.stats()
    }

    /// Poll slot the next request will come from
    pub fn poll_slot(&self) -> usize {
        self.scheduler.slot()
    }

    async fn start_scan(&mut self, now: Instant) {
        if self.state == ConnectionState::Scanning {
            return;
        }

        self.peer = None;
        self.last_scan_attempt = Some(now);
        self.set_state(ConnectionState::Scanning);

        if let Err(e) = self.transport.start_scan().await {
            warn!("Failed to start scan: {}", e);
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Derived fields, RSSI refresh and the next poll request
    async fn service_link(&mut self, now: Instant) {
        let connected_at = *self.connected_at.get_or_insert(now);
        self.scheduler.derive_fields(&mut self.snapshot, connected_at, now);

        if self.scheduler.rssi_due(now) {
            match self.transport.rssi().await {
                Ok(Some(rssi)) => {
                    self.rssi = rssi;
                    self.snapshot.rssi = rssi;
                }
                Ok(None) => {}
                Err(e) => debug!("RSSI read failed: {}", e),
            }
        }

        if let Some(request) = self.scheduler.poll(now) {
            // Not retried; the next cycle asks again
            if let Err(e) = self.send_request(&request).await {
                debug!("Failed to send request {:?}: {}", request, e);
            }
        }
    }

    fn drop_link(&mut self) {
        self.peer = None;
        self.parser.reset();
        self.snapshot.connected = false;
        self.connected_at = None;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(LinkEvent::Discovered(peer)) => self.on_discovered(peer).await,
                Ok(LinkEvent::Notification(chunk)) => self.on_notification(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    trace!("Transport event channel closed");
                    break;
                }
            }
        }
    }

    async fn on_discovered(&mut self, peer: DiscoveredPeer) {
        if self.state != ConnectionState::Scanning || self.peer.is_some() {
            return;
        }
        if !self.ble.matches_name(&peer.name) {
            trace!("Ignoring {} ({})", peer.name, peer.id);
            return;
        }

        info!("Found: {} ({})", peer.name, peer.id);
        if let Err(e) = self.transport.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }
        self.peer = Some(peer);
        self.set_state(ConnectionState::Connecting);
    }

    fn on_notification(&mut self, chunk: &[u8]) {
        trace!("RX {:02X?}", chunk);
        for frame in self.parser.push(chunk) {
            match decode_frame(&frame) {
                Some(reading) => {
                    trace!("Decoded {:?}", reading);
                    self.snapshot.apply(reading);
                }
                None => trace!(
                    "Ignored frame addr=0x{:02X} reg={:?} len={}",
                    frame.address,
                    frame.register,
                    frame.payload.len()
                ),
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Link state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(LinkStatus {
            state: self.state,
            snapshot: self.snapshot.clone(),
        });
    }
}
