//! # BLE Transport
//!
//! [`Transport`] implementation on top of btleplug.
//!
//! Two background tasks feed the connection manager's event channel:
//! - the adapter event task reports named peripherals as they advertise
//! - the notification task forwards RX characteristic values once subscribed
//!
//! Both only forward raw data; they never decide anything about the link.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::transport::{DiscoveredPeer, EventSender, LinkEvent, Transport};
use crate::config::BleConfig;
use crate::error::{DashError, Result};
use crate::m365::protocol::{M365_RX_CHAR_UUID, M365_SERVICE_UUID, M365_TX_CHAR_UUID};

/// Scooter link over the host's Bluetooth adapter
pub struct BleTransport {
    adapter: Adapter,
    events: EventSender,
    connect_timeout: Duration,
    peripheral: Option<Peripheral>,
    tx_char: Option<Characteristic>,
    rx_char: Option<Characteristic>,
    scan_task: JoinHandle<()>,
    notify_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("connected_to", &self.peripheral.as_ref().map(|p| p.address()))
            .field("resolved", &self.tx_char.is_some())
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Open the first Bluetooth adapter on the host
    ///
    /// # Arguments
    ///
    /// * `events` - Channel discoveries and notifications are forwarded to
    /// * `config` - BLE timing settings
    ///
    /// # Errors
    ///
    /// Returns error if the Bluetooth stack is unavailable or no adapter exists
    pub async fn first_adapter(events: EventSender, config: &BleConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DashError::Transport("No Bluetooth adapter found".to_string()))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        let scan_task = spawn_discovery_task(adapter.clone(), events.clone()).await?;

        Ok(Self {
            adapter,
            events,
            connect_timeout: Duration::from_secs(config.connect_timeout_s),
            peripheral: None,
            tx_char: None,
            rx_char: None,
            scan_task,
            notify_task: None,
        })
    }

    async fn find_peripheral(&self, id: &str) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string() == id {
                return Ok(peripheral);
            }
        }
        Err(DashError::Transport(format!("Peripheral {} is no longer known", id)))
    }

    fn connected_peripheral(&self) -> Result<&Peripheral> {
        self.peripheral
            .as_ref()
            .ok_or_else(|| DashError::Transport("Not connected".to_string()))
    }

    fn clear_link(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.tx_char = None;
        self.rx_char = None;
        self.peripheral = None;
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.scan_task.abort();
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&mut self) -> Result<()> {
        info!("Scanning for scooters...");
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&mut self, peer: &DiscoveredPeer) -> Result<()> {
        let peripheral = self.find_peripheral(&peer.id).await?;

        match tokio::time::timeout(self.connect_timeout, peripheral.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DashError::Transport(format!(
                    "Connect to {} timed out after {}s",
                    peer.id,
                    self.connect_timeout.as_secs()
                )))
            }
        }

        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn resolve(&mut self) -> Result<()> {
        let peripheral = self.connected_peripheral()?;
        peripheral.discover_services().await?;

        let (tx, rx) = find_uart_characteristics(&peripheral.services())?;
        debug!("Resolved TX {} / RX {}", tx.uuid, rx.uuid);

        self.tx_char = Some(tx);
        self.rx_char = Some(rx);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        let peripheral = self.connected_peripheral()?.clone();
        let rx = self
            .rx_char
            .clone()
            .ok_or(DashError::CharacteristicNotFound(M365_RX_CHAR_UUID))?;

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&rx).await?;

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != M365_RX_CHAR_UUID {
                    continue;
                }
                if events.send(LinkEvent::Notification(notification.value)).is_err() {
                    break;
                }
            }
            trace!("Notification stream ended");
        });

        if let Some(old) = self.notify_task.replace(task) {
            old.abort();
        }
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let peripheral = self.connected_peripheral()?;
        let tx = self
            .tx_char
            .as_ref()
            .ok_or(DashError::CharacteristicNotFound(M365_TX_CHAR_UUID))?;

        peripheral.write(tx, frame, WriteType::WithoutResponse).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let peripheral = self.peripheral.clone();
        self.clear_link();

        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await?;
            info!("Disconnected from {}", peripheral.address());
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn rssi(&mut self) -> Result<Option<i16>> {
        let peripheral = self.connected_peripheral()?;
        Ok(peripheral.properties().await?.and_then(|props| props.rssi))
    }
}

/// Forward named advertisements from the adapter's event stream
async fn spawn_discovery_task(adapter: Adapter, events: EventSender) -> Result<JoinHandle<()>> {
    let mut stream = adapter.events().await?;

    Ok(tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let peripheral = match adapter.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    trace!("Peripheral lookup failed: {}", e);
                    continue;
                }
            };

            let props = match peripheral.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    trace!("Properties unavailable: {}", e);
                    continue;
                }
            };

            let Some(peer) = discovered_peer(peripheral.address().to_string(), props.local_name, props.rssi) else {
                continue;
            };

            if events.send(LinkEvent::Discovered(peer)).is_err() {
                warn!("Event channel closed, stopping discovery");
                break;
            }
        }
    }))
}

/// Peers that advertise no name cannot be matched and are skipped
fn discovered_peer(id: String, local_name: Option<String>, rssi: Option<i16>) -> Option<DiscoveredPeer> {
    let name = local_name.filter(|n| !n.is_empty())?;
    Some(DiscoveredPeer { id, name, rssi })
}

/// Locate the scooter service and its TX/RX characteristics
///
/// # Errors
///
/// * [`DashError::ServiceNotFound`] if the UART service is absent
/// * [`DashError::CharacteristicNotFound`] if either characteristic is missing
fn find_uart_characteristics(services: &BTreeSet<Service>) -> Result<(Characteristic, Characteristic)> {
    let service = services
        .iter()
        .find(|s| s.uuid == M365_SERVICE_UUID)
        .ok_or(DashError::ServiceNotFound(M365_SERVICE_UUID))?;

    let find = |uuid| {
        service
            .characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(DashError::CharacteristicNotFound(uuid))
    };

    Ok((find(M365_TX_CHAR_UUID)?, find(M365_RX_CHAR_UUID)?))
}
