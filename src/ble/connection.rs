//! btleplug-backed link layer.
//!
//! Drives a real Bluetooth adapter behind the [`GattConnector`] /
//! [`GattLink`] traits. Every command spawns a short task on the tokio
//! runtime and reports its outcome as a [`LinkEvent`](crate::ble::link::LinkEvent).
//!
//! The peripheral must already be known to the adapter (i.e. seen by a
//! scan the caller ran); this crate does not scan.

use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::SensorCharacteristic;
use crate::ble::link::{GattConnector, GattLink, LinkEventSender, LinkState};
use crate::ble::uuids::is_sensor_service;
use crate::data::DeviceAddress;
use crate::error::{Error, Result};

/// Opens GATT links through a btleplug adapter.
pub struct BtleplugConnector {
    /// The BLE adapter peripherals are resolved on.
    adapter: Adapter,
    /// Runtime link tasks are spawned on.
    runtime: Handle,
}

impl BtleplugConnector {
    /// Create a connector on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available or if called outside
    /// a tokio runtime.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter)
    }

    /// Create a connector on a specific adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime.
    pub fn with_adapter(adapter: Adapter) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("No tokio runtime: {}", e)))?;

        Ok(Self { adapter, runtime })
    }

    /// Get the adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

impl GattConnector for BtleplugConnector {
    fn open(&self, address: DeviceAddress, events: LinkEventSender) -> Result<Box<dyn GattLink>> {
        Ok(Box::new(BtleplugLink::open(
            self.adapter.clone(),
            self.runtime.clone(),
            address,
            events,
        )))
    }
}

/// A GATT link to one peripheral.
pub struct BtleplugLink {
    /// Target address.
    address: DeviceAddress,
    /// Runtime link tasks are spawned on.
    runtime: Handle,
    /// The peripheral, once resolved on the adapter.
    peripheral: Arc<RwLock<Option<Peripheral>>>,
    /// Event channel back to the session.
    events: LinkEventSender,
    /// Outstanding tasks, aborted on close.
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugLink {
    fn open(
        adapter: Adapter,
        runtime: Handle,
        address: DeviceAddress,
        events: LinkEventSender,
    ) -> Self {
        let peripheral = Arc::new(RwLock::new(None));

        let mut link = Self {
            address,
            runtime,
            peripheral: peripheral.clone(),
            events: events.clone(),
            tasks: Vec::new(),
        };

        link.spawn(watch_disconnects(
            adapter.clone(),
            peripheral.clone(),
            events.clone(),
        ));
        link.spawn(connect_and_listen(adapter, address, peripheral, events));

        link
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(self.runtime.spawn(task));
    }

    fn resolved_peripheral(&self) -> Result<Peripheral> {
        self.peripheral.read().clone().ok_or(Error::NotConnected)
    }

    fn characteristic(
        &self,
        characteristic: SensorCharacteristic,
    ) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.resolved_peripheral()?;
        let found = find_characteristic(&peripheral, characteristic).ok_or_else(|| {
            Error::CharacteristicNotFound {
                uuid: characteristic.uuid().to_string(),
            }
        })?;
        Ok((peripheral, found))
    }
}

impl GattLink for BtleplugLink {
    fn discover_services(&mut self) -> Result<()> {
        let peripheral = self.resolved_peripheral()?;
        let events = self.events.clone();

        self.spawn(async move {
            match peripheral.discover_services().await {
                Ok(()) => events.services_discovered(true),
                Err(e) => {
                    warn!("Failed to discover services: {}", e);
                    events.services_discovered(false);
                }
            }
        });

        Ok(())
    }

    fn has_service(&self, service: &Uuid) -> bool {
        self.peripheral
            .read()
            .as_ref()
            .map(|p| p.services().iter().any(|s| s.uuid == *service))
            .unwrap_or(false)
    }

    fn has_characteristic(&self, characteristic: SensorCharacteristic) -> bool {
        self.peripheral
            .read()
            .as_ref()
            .and_then(|p| find_characteristic(p, characteristic))
            .is_some()
    }

    fn subscribe(&mut self, characteristic: SensorCharacteristic) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic)?;

        debug!(
            "Subscribing to {} ({}), properties: {:?}",
            characteristic, target.uuid, target.properties
        );

        let events = self.events.clone();

        self.spawn(async move {
            match peripheral.subscribe(&target).await {
                Ok(()) => debug!("Subscribed to notifications from {}", characteristic),
                Err(e) => {
                    warn!("Failed to subscribe to {}: {}", characteristic, e);
                    events.subscription_failed(characteristic);
                }
            }
        });

        Ok(())
    }

    fn read(&mut self, characteristic: SensorCharacteristic) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        let events = self.events.clone();

        self.spawn(async move {
            match peripheral.read(&target).await {
                Ok(data) => {
                    trace!("Read {} bytes from {}", data.len(), characteristic);
                    events.characteristic_read(characteristic, Bytes::from(data), true);
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", characteristic, e);
                    events.characteristic_read(characteristic, Bytes::new(), false);
                }
            }
        });

        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let events = self.events.clone();
        let peripheral = self.peripheral.read().clone();

        match peripheral {
            Some(peripheral) => self.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    error!("Failed to disconnect: {}", e);
                }
                events.link_state_changed(LinkState::Disconnected);
            }),
            // Still resolving; nothing to tear down on the radio.
            None => events.link_state_changed(LinkState::Disconnected),
        }

        Ok(())
    }

    fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        let peripheral = self.peripheral.write().take();
        if let Some(peripheral) = peripheral {
            let address = self.address;
            self.runtime.spawn(async move {
                if peripheral.is_connected().await.unwrap_or(false) {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!("Disconnect on close of {} failed: {}", address, e);
                    }
                }
            });
        }

        debug!("Link to {} closed", self.address);
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Find a telemetry characteristic within the sensor service.
fn find_characteristic(
    peripheral: &Peripheral,
    characteristic: SensorCharacteristic,
) -> Option<Characteristic> {
    let uuid = characteristic.uuid();
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid && is_sensor_service(&c.service_uuid))
}

/// Resolve the peripheral, connect, then forward notifications until the
/// stream ends.
async fn connect_and_listen(
    adapter: Adapter,
    address: DeviceAddress,
    slot: Arc<RwLock<Option<Peripheral>>>,
    events: LinkEventSender,
) {
    let peripheral = match adapter.peripherals().await {
        Ok(peripherals) => peripherals
            .into_iter()
            .find(|p| p.address() == address.bd_addr()),
        Err(e) => {
            warn!("Failed to list peripherals: {}", e);
            None
        }
    };

    let Some(peripheral) = peripheral else {
        warn!("Device {} not known to adapter", address);
        events.link_state_changed(LinkState::Disconnected);
        return;
    };

    *slot.write() = Some(peripheral.clone());

    if let Err(e) = peripheral.connect().await {
        warn!("Connection to {} failed: {}", address, e);
        events.link_state_changed(LinkState::Disconnected);
        return;
    }

    info!("Connected to GATT server on {}", address);
    events.link_state_changed(LinkState::Connected);

    let mut notifications = match peripheral.notifications().await {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to get notifications stream: {}", e);
            return;
        }
    };

    while let Some(notification) = notifications.next().await {
        match SensorCharacteristic::from_uuid(&notification.uuid) {
            Some(characteristic) => {
                trace!(
                    "Notification from {}: {:02X?}",
                    characteristic,
                    notification.value
                );
                events.characteristic_changed(characteristic, Bytes::from(notification.value));
            }
            None => trace!("Ignoring notification from {}", notification.uuid),
        }
    }

    debug!("Notification stream for {} ended", address);
}

/// Report adapter-level disconnects of our peripheral.
async fn watch_disconnects(
    adapter: Adapter,
    slot: Arc<RwLock<Option<Peripheral>>>,
    events: LinkEventSender,
) {
    let mut adapter_events = match adapter.events().await {
        Ok(e) => e,
        Err(e) => {
            error!("Failed to get adapter events: {}", e);
            return;
        }
    };

    while let Some(event) = adapter_events.next().await {
        if let CentralEvent::DeviceDisconnected(id) = event {
            let ours = slot.read().as_ref().map(|p| p.id() == id).unwrap_or(false);
            if ours {
                info!("Disconnected from GATT server");
                events.link_state_changed(LinkState::Disconnected);
            }
        }
    }
}
