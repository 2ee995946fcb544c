//! GATT session management.
//!
//! [`SessionManager`] drives one sensor from "address known" to "streaming
//! live data". Caller commands (`connect`, `disconnect`, `close`, `read`) and
//! link callbacks ([`LinkEvent`]) are applied under one lock, so a connect in
//! progress and a late disconnect notification can never interleave.
//!
//! ```text
//! Idle --connect--> Connecting --link up--> Connected --discovered--> ServicesDiscovering --> Ready
//!                    |      |                  |                         |                    |
//!    invalid address |      | link down        | link down or            | service missing    | disconnect()
//!                    v      v                  | discovery failed        v                    v
//!      Idle <-- Error      Idle                +--------------------->  Idle            Disconnecting
//!                                                                                             | link down
//!                                                                                             v
//!                                                                                            Idle
//! ```
//!
//! `disconnect()` from `Connecting`, `Connected` or `ServicesDiscovering` also
//! goes through `Disconnecting`; `close()` returns to `Idle` from any state.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::ble::characteristics::SensorCharacteristic;
use crate::ble::link::{
    GattConnector, GattLink, Generation, LinkEvent, LinkEventKind, LinkEventSender, LinkState,
};
use crate::ble::uuids::SENSOR_SERVICE_UUID;
use crate::data::{DeviceAddress, DeviceIdentity, Reading};
use crate::error::{Error, Result, SessionError};
use crate::protocol::{decode, is_underflow};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Capacity of the outbound event channel. Slow subscribers that fall
    /// further behind than this miss events.
    pub event_capacity: usize,
    /// Issue an explicit read of every subscribed characteristic on
    /// reaching [`SessionState::Ready`], so the first reading does not wait
    /// for the device's next notification.
    pub read_on_ready: bool,
}

impl SessionConfig {
    /// Default outbound event channel capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Enable or disable reads on reaching `Ready`.
    pub fn with_read_on_ready(mut self, read_on_ready: bool) -> Self {
        self.read_on_ready = read_on_ready;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
            read_on_ready: false,
        }
    }
}

/// State of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No link.
    #[default]
    Idle,
    /// Link opened, waiting for the connection to come up.
    Connecting,
    /// Connected, waiting for service discovery.
    Connected,
    /// Services known, enabling notifications.
    ServicesDiscovering,
    /// Streaming live data.
    Ready,
    /// Disconnect requested, waiting for the link to go down.
    Disconnecting,
    /// A connect attempt was rejected before any link was opened.
    Error,
}

impl SessionState {
    /// Check if the GATT connection is up.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::ServicesDiscovering | Self::Ready
        )
    }

    /// Check if telemetry is streaming.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServicesDiscovering | Self::Disconnecting
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ServicesDiscovering => write!(f, "ServicesDiscovering"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Event emitted to session subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The state machine moved. `address` is `None` for a connect attempt
    /// rejected before it had a device.
    StateChanged {
        /// Device the session is about.
        address: Option<DeviceAddress>,
        /// The new state.
        state: SessionState,
    },
    /// The GATT connection came up.
    Connected {
        /// Device address.
        address: DeviceAddress,
    },
    /// The session ended.
    Disconnected {
        /// Device address.
        address: DeviceAddress,
    },
    /// Discovery finished and notifications were requested.
    ServicesReady {
        /// Device address.
        address: DeviceAddress,
        /// Characteristics successfully subscribed, in subscription order.
        subscribed: Vec<SensorCharacteristic>,
    },
    /// A new reading was decoded.
    ReadingAvailable {
        /// Device address.
        address: DeviceAddress,
        /// The updated reading.
        reading: Reading,
    },
    /// An asynchronous failure.
    Error {
        /// Device address.
        address: DeviceAddress,
        /// What went wrong.
        error: SessionError,
    },
}

impl SessionEvent {
    /// The device this event correlates to.
    pub fn address(&self) -> Option<DeviceAddress> {
        match self {
            Self::StateChanged { address, .. } => *address,
            Self::Connected { address }
            | Self::Disconnected { address }
            | Self::ServicesReady { address, .. }
            | Self::ReadingAvailable { address, .. }
            | Self::Error { address, .. } => Some(*address),
        }
    }
}

/// Everything mutated by transitions. Only touched under the session lock.
#[derive(Default)]
struct SessionCore {
    /// Current state.
    state: SessionState,
    /// Current connect attempt.
    generation: Generation,
    /// The single live link, if any.
    link: Option<Box<dyn GattLink>>,
    /// Device of the current (or last) session.
    device: Option<DeviceIdentity>,
    /// Latest reading of the current (or last) session.
    reading: Option<Reading>,
    /// Characteristics with notifications enabled.
    subscribed: Vec<SensorCharacteristic>,
}

impl SessionCore {
    fn address(&self) -> Option<DeviceAddress> {
        self.device.as_ref().map(DeviceIdentity::address)
    }
}

/// Manages a GATT session with one sensor.
pub struct SessionManager {
    /// Opens links.
    connector: Box<dyn GattConnector>,
    /// Session tuning.
    config: SessionConfig,
    /// State machine, serialized.
    core: Mutex<SessionCore>,
    /// Outbound events.
    event_tx: broadcast::Sender<SessionEvent>,
    /// Inbound link events, cloned into every [`LinkEventSender`].
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    /// Taken by the event loop.
    link_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl SessionManager {
    /// Create a session manager with the default configuration.
    pub fn new(connector: impl GattConnector + 'static) -> Self {
        Self::with_config(connector, SessionConfig::default())
    }

    /// Create a session manager.
    pub fn with_config(connector: impl GattConnector + 'static, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        Self {
            connector: Box::new(connector),
            config,
            core: Mutex::new(SessionCore::default()),
            event_tx,
            link_tx,
            link_rx: Mutex::new(Some(link_rx)),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Start draining link events on the current tokio runtime.
    ///
    /// The loop ends when the session is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop was already started.
    pub fn spawn_event_loop(self: &Arc<Self>) -> Result<tokio::task::JoinHandle<()>> {
        let mut rx = self
            .link_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("Event loop already running".to_string()))?;
        let session: Weak<Self> = Arc::downgrade(self);

        Ok(tokio::spawn(async move {
            debug!("Session event loop started");
            while let Some(event) = rx.recv().await {
                match session.upgrade() {
                    Some(session) => session.handle_link_event(event),
                    None => break,
                }
            }
            debug!("Session event loop stopped");
        }))
    }

    // === Commands ===

    /// Connect to the sensor at `address`.
    ///
    /// Returns once the link has been asked to connect; progress is
    /// reported through [`subscribe`](Self::subscribe). Any existing link
    /// is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressInvalid`] without touching any link if the
    /// address cannot be parsed, or the connector's error if it cannot open
    /// a link.
    pub fn connect(&self, address: &str) -> Result<()> {
        let mut core = self.core.lock();

        let parsed = match DeviceAddress::parse(address) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Rejected connect to invalid address {:?}", address);
                if core.state == SessionState::Idle {
                    core.device = None;
                    core.reading = None;
                    self.set_state(&mut core, SessionState::Connecting);
                    self.set_state(&mut core, SessionState::Error);
                    self.set_state(&mut core, SessionState::Idle);
                }
                return Err(e);
            }
        };

        self.connect_locked(&mut core, DeviceIdentity::new(None, parsed, 0))
    }

    /// Connect to a device identity obtained from a scan.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if it cannot open a link.
    pub fn connect_device(&self, device: DeviceIdentity) -> Result<()> {
        let mut core = self.core.lock();
        self.connect_locked(&mut core, device)
    }

    /// Request disconnection.
    ///
    /// The session moves to `Disconnecting` and reaches `Idle` once the
    /// link reports the disconnect. Does nothing when already `Idle` or
    /// `Disconnecting`.
    pub fn disconnect(&self) {
        let mut core = self.core.lock();

        match core.state {
            SessionState::Idle | SessionState::Error => {
                debug!("Already disconnected");
                return;
            }
            SessionState::Disconnecting => {
                debug!("Disconnect already in progress");
                return;
            }
            _ => {}
        }

        info!("Disconnecting from {:?}", core.address());
        self.set_state(&mut core, SessionState::Disconnecting);

        match core.link.as_mut().map(|link| link.disconnect()) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!("Disconnect request failed, releasing link: {}", e);
                self.end_session(&mut core, false);
            }
            None => self.end_session(&mut core, false),
        }
    }

    /// Release the link immediately and reset to `Idle`.
    ///
    /// Any event still in flight from the released link is discarded.
    pub fn close(&self) {
        let mut core = self.core.lock();
        core.generation = core.generation.next();
        self.end_session(&mut core, false);
    }

    /// Request an explicit read of a characteristic.
    ///
    /// The value arrives later as a `ReadingAvailable` event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] unless the session is `Ready`, or the
    /// link's error if the read cannot be issued.
    pub fn read(&self, characteristic: SensorCharacteristic) -> Result<()> {
        let mut core = self.core.lock();

        if !core.state.is_ready() {
            return Err(Error::NotConnected);
        }

        core.link
            .as_mut()
            .ok_or(Error::NotConnected)?
            .read(characteristic)
    }

    /// Refresh the current device's advertised name and signal strength.
    pub fn update_advertisement(&self, name: Option<String>, signal_strength: i16) {
        if let Some(device) = self.core.lock().device.as_mut() {
            device.update_advertisement(name, signal_strength);
        }
    }

    // === Queries ===

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Get the current connect attempt's generation.
    pub fn generation(&self) -> Generation {
        self.core.lock().generation
    }

    /// Get the device of the current (or last) session.
    pub fn device(&self) -> Option<DeviceIdentity> {
        self.core.lock().device.clone()
    }

    /// Get the latest reading of the current (or last) session.
    pub fn current_reading(&self) -> Option<Reading> {
        self.core.lock().reading
    }

    /// Get the characteristics with notifications enabled.
    pub fn subscribed(&self) -> Vec<SensorCharacteristic> {
        self.core.lock().subscribed.clone()
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // === Events ===

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for new readings.
    ///
    /// Must be called within a tokio runtime.
    pub fn on_reading_available<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DeviceAddress, &Reading) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::ReadingAvailable { address, reading }) => {
                        callback(address, &reading)
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Reading callback lagged, {} events missed", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Link events ===

    /// Apply one link event to the state machine.
    ///
    /// Events from a superseded connect attempt are dropped.
    pub fn handle_link_event(&self, event: LinkEvent) {
        let mut core = self.core.lock();

        if event.generation != core.generation {
            debug!(
                "Dropping stale link event from attempt {} (current {}): {:?}",
                event.generation, core.generation, event.kind
            );
            return;
        }

        match event.kind {
            LinkEventKind::LinkStateChanged(LinkState::Connected) => {
                self.on_link_connected(&mut core)
            }
            LinkEventKind::LinkStateChanged(LinkState::Disconnected) => {
                self.on_link_disconnected(&mut core)
            }
            LinkEventKind::ServicesDiscovered { success } => {
                self.on_services_discovered(&mut core, success)
            }
            LinkEventKind::CharacteristicChanged {
                characteristic,
                value,
            } => self.on_value(&mut core, characteristic, &value),
            LinkEventKind::CharacteristicRead {
                characteristic,
                value,
                success,
            } => {
                if success {
                    self.on_value(&mut core, characteristic, &value);
                } else {
                    warn!("Read of {} characteristic failed", characteristic);
                }
            }
            LinkEventKind::SubscriptionFailed { characteristic } => {
                self.on_subscription_rejected(&mut core, characteristic)
            }
        }
    }

    fn on_link_connected(&self, core: &mut SessionCore) {
        if core.state != SessionState::Connecting {
            debug!("Ignoring link connect in state {}", core.state);
            return;
        }

        info!("Connected to {:?}", core.address());
        if let Some(device) = core.device.as_mut() {
            device.set_connected(true);
        }
        self.set_state(core, SessionState::Connected);
        if let Some(address) = core.address() {
            self.emit(SessionEvent::Connected { address });
        }

        match core.link.as_mut().map(|link| link.discover_services()) {
            Some(Ok(())) => debug!("Service discovery requested"),
            Some(Err(e)) => {
                warn!("Failed to request service discovery: {}", e);
                self.fail(core, SessionError::DiscoveryFailed);
            }
            None => self.fail(core, SessionError::DiscoveryFailed),
        }
    }

    fn on_link_disconnected(&self, core: &mut SessionCore) {
        if core.state == SessionState::Idle {
            trace!("Link disconnect while idle");
            return;
        }

        info!("Disconnected from {:?}", core.address());
        self.end_session(core, false);
    }

    fn on_services_discovered(&self, core: &mut SessionCore, success: bool) {
        if core.state != SessionState::Connected {
            debug!("Ignoring service discovery result in state {}", core.state);
            return;
        }

        if !success {
            warn!("Service discovery failed");
            self.fail(core, SessionError::DiscoveryFailed);
            return;
        }

        self.set_state(core, SessionState::ServicesDiscovering);

        let service_found = core
            .link
            .as_ref()
            .map(|link| link.has_service(&SENSOR_SERVICE_UUID))
            .unwrap_or(false);
        if !service_found {
            warn!("Sensor service {} not found", SENSOR_SERVICE_UUID);
            self.fail(core, SessionError::ServiceNotFound);
            return;
        }

        let mut subscribed = Vec::new();
        let mut failed = Vec::new();

        if let Some(link) = core.link.as_mut() {
            for characteristic in SensorCharacteristic::ALL {
                if !link.has_characteristic(characteristic) {
                    warn!("{} characteristic not found, skipping", characteristic);
                    failed.push(characteristic);
                    continue;
                }

                match link.subscribe(characteristic) {
                    Ok(()) => subscribed.push(characteristic),
                    Err(e) => {
                        warn!("Failed to subscribe to {}: {}", characteristic, e);
                        failed.push(characteristic);
                    }
                }
            }
        }

        core.subscribed = subscribed.clone();
        self.set_state(core, SessionState::Ready);

        let Some(address) = core.address() else {
            return;
        };

        for characteristic in failed {
            self.emit(SessionEvent::Error {
                address,
                error: SessionError::SubscriptionFailed(characteristic),
            });
        }

        info!(
            "Session with {} ready, streaming {:?}",
            address, core.subscribed
        );
        self.emit(SessionEvent::ServicesReady {
            address,
            subscribed: subscribed.clone(),
        });

        if self.config.read_on_ready {
            if let Some(link) = core.link.as_mut() {
                for characteristic in subscribed {
                    if let Err(e) = link.read(characteristic) {
                        warn!("Initial read of {} failed: {}", characteristic, e);
                    }
                }
            }
        }
    }

    fn on_subscription_rejected(
        &self,
        core: &mut SessionCore,
        characteristic: SensorCharacteristic,
    ) {
        if core.state != SessionState::Ready || !core.subscribed.contains(&characteristic) {
            debug!(
                "Ignoring rejected {} subscription in state {}",
                characteristic, core.state
            );
            return;
        }

        warn!("Device rejected {} subscription", characteristic);
        core.subscribed.retain(|c| *c != characteristic);

        if let Some(address) = core.address() {
            self.emit(SessionEvent::Error {
                address,
                error: SessionError::SubscriptionFailed(characteristic),
            });
        }
    }

    fn on_value(&self, core: &mut SessionCore, characteristic: SensorCharacteristic, value: &[u8]) {
        if core.state != SessionState::Ready {
            debug!(
                "Ignoring {} value in state {}",
                characteristic, core.state
            );
            return;
        }

        if is_underflow(characteristic, value) {
            debug!(
                "Short {} payload ({} bytes), decoding as zero",
                characteristic,
                value.len()
            );
        }

        let now = Utc::now();
        let measurement = decode(characteristic, value);
        let reading = core
            .reading
            .unwrap_or_else(|| Reading::empty(now))
            .merge(measurement, now);
        core.reading = Some(reading);

        trace!("{:?} -> {}", measurement, reading);

        if let Some(address) = core.address() {
            self.emit(SessionEvent::ReadingAvailable { address, reading });
        }
    }

    // === Internal ===

    fn connect_locked(&self, core: &mut SessionCore, device: DeviceIdentity) -> Result<()> {
        // At most one live link: finish whatever came before.
        self.end_session(core, true);

        core.generation = core.generation.next();
        let generation = core.generation;
        let address = device.address();

        core.device = Some(device);
        core.reading = Some(Reading::empty(Utc::now()));
        core.subscribed.clear();
        self.set_state(core, SessionState::Connecting);

        let events = LinkEventSender::new(generation, self.link_tx.clone());
        match self.connector.open(address, events) {
            Ok(link) => {
                info!("Connecting to {} (attempt {})", address, generation);
                core.link = Some(link);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open link to {}: {}", address, e);
                self.set_state(core, SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Report an asynchronous failure and tear the session down.
    fn fail(&self, core: &mut SessionCore, error: SessionError) {
        if let Some(address) = core.address() {
            self.emit(SessionEvent::Error { address, error });
        }
        self.end_session(core, true);
    }

    /// Release the link and return to `Idle`, emitting `Disconnected` if a
    /// session was in progress.
    fn end_session(&self, core: &mut SessionCore, disconnect_link: bool) {
        if let Some(mut link) = core.link.take() {
            if disconnect_link {
                if let Err(e) = link.disconnect() {
                    debug!("Disconnect before release failed: {}", e);
                }
            }
            link.close();
        }
        core.subscribed.clear();

        if core.state == SessionState::Idle {
            return;
        }

        if let Some(device) = core.device.as_mut() {
            device.set_connected(false);
        }
        self.set_state(core, SessionState::Idle);
        if let Some(address) = core.address() {
            self.emit(SessionEvent::Disconnected { address });
        }
    }

    /// Update the state and emit an event.
    fn set_state(&self, core: &mut SessionCore, new_state: SessionState) {
        let old_state = std::mem::replace(&mut core.state, new_state);

        if old_state != new_state {
            debug!("Session state changed: {} -> {}", old_state, new_state);
            self.emit(SessionEvent::StateChanged {
                address: core.address(),
                state: new_state,
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        trace!("Session event: {:?}", event);
        let _ = self.event_tx.send(event);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(mut link) = self.core.get_mut().link.take() {
            link.close();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("SessionManager")
            .field("state", &core.state)
            .field("generation", &core.generation)
            .field("device", &core.device)
            .finish()
    }
}
