//! Trait abstraction for the scooter link to enable testing
//!
//! The transport performs I/O on request from the tick loop and reports
//! asynchronous happenings (advertisements, notification chunks) as
//! [`LinkEvent`]s on a channel that only the tick loop drains.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A device seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Transport-specific identifier (MAC address or platform id)
    pub id: String,
    /// Advertised local name
    pub name: String,
    pub rssi: Option<i16>,
}

/// Something the transport observed outside of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A device advertised during a scan
    Discovered(DiscoveredPeer),
    /// A chunk of bytes notified on the RX characteristic
    Notification(Vec<u8>),
}

/// Producer half handed to a transport
pub type EventSender = mpsc::UnboundedSender<LinkEvent>;

/// Consumer half owned by the connection manager
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create the channel connecting a transport to its connection manager
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Link operations the connection manager drives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Start looking for peers; discoveries arrive as [`LinkEvent::Discovered`]
    async fn start_scan(&mut self) -> Result<()>;

    async fn stop_scan(&mut self) -> Result<()>;

    /// Establish the link to a discovered peer
    async fn connect(&mut self, peer: &DiscoveredPeer) -> Result<()>;

    /// Resolve the scooter service and its TX/RX characteristics
    async fn resolve(&mut self) -> Result<()>;

    /// Arm RX notifications; chunks arrive as [`LinkEvent::Notification`]
    async fn subscribe(&mut self) -> Result<()>;

    /// Write one request frame to the TX characteristic
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the link is still up
    async fn is_connected(&self) -> bool;

    /// Current signal strength in dBm
    async fn rssi(&mut self) -> Result<Option<i16>>;
}
