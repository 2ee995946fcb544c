//! Link-layer interface.
//!
//! The session manager never talks to a radio directly. It opens a
//! [`GattLink`] through a [`GattConnector`] and issues fire-and-forget
//! commands on it; the link reports outcomes later as [`LinkEvent`]s sent
//! through the [`LinkEventSender`] it was opened with.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::ble::characteristics::SensorCharacteristic;
use crate::data::DeviceAddress;
use crate::error::Result;

/// Tag identifying one connect attempt.
///
/// Every call to `connect` (and every `close`) starts a new generation.
/// Events carrying an older generation belong to a superseded link and
/// are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    /// Create a generation from a raw counter value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The generation following this one.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Physical link state reported by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// The GATT connection is up.
    Connected,
    /// The GATT connection is down.
    Disconnected,
}

/// What the link layer observed.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEventKind {
    /// The connection came up or went down.
    LinkStateChanged(LinkState),
    /// Service discovery finished.
    ServicesDiscovered {
        /// Whether enumeration succeeded.
        success: bool,
    },
    /// Unsolicited notification of a new value.
    CharacteristicChanged {
        /// Which characteristic changed.
        characteristic: SensorCharacteristic,
        /// The raw value.
        value: Bytes,
    },
    /// Response to an explicit read request.
    CharacteristicRead {
        /// Which characteristic was read.
        characteristic: SensorCharacteristic,
        /// The raw value (empty on failure).
        value: Bytes,
        /// Whether the read succeeded.
        success: bool,
    },
    /// The device rejected a subscription that was issued successfully.
    SubscriptionFailed {
        /// Which characteristic will not notify.
        characteristic: SensorCharacteristic,
    },
}

/// A link-layer event tagged with the connect attempt it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    /// Connect attempt that produced the event.
    pub generation: Generation,
    /// The event itself.
    pub kind: LinkEventKind,
}

impl LinkEvent {
    /// Create a new link event.
    pub fn new(generation: Generation, kind: LinkEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Handle given to a link for reporting events back to the session.
///
/// Every event sent through it is stamped with the generation of the
/// connect attempt that opened the link.
#[derive(Debug, Clone)]
pub struct LinkEventSender {
    generation: Generation,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEventSender {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation stamped on every event.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Send a raw event kind.
    ///
    /// Sending after the session has shut down is silently ignored.
    pub fn send(&self, kind: LinkEventKind) {
        trace!("Link event {}: {:?}", self.generation, kind);
        let _ = self.tx.send(LinkEvent::new(self.generation, kind));
    }

    /// Report a connection state change.
    pub fn link_state_changed(&self, state: LinkState) {
        self.send(LinkEventKind::LinkStateChanged(state));
    }

    /// Report the outcome of service discovery.
    pub fn services_discovered(&self, success: bool) {
        self.send(LinkEventKind::ServicesDiscovered { success });
    }

    /// Report a notification.
    pub fn characteristic_changed(&self, characteristic: SensorCharacteristic, value: Bytes) {
        self.send(LinkEventKind::CharacteristicChanged {
            characteristic,
            value,
        });
    }

    /// Report a read response.
    pub fn characteristic_read(
        &self,
        characteristic: SensorCharacteristic,
        value: Bytes,
        success: bool,
    ) {
        self.send(LinkEventKind::CharacteristicRead {
            characteristic,
            value,
            success,
        });
    }

    /// Report a subscription the device rejected.
    pub fn subscription_failed(&self, characteristic: SensorCharacteristic) {
        self.send(LinkEventKind::SubscriptionFailed { characteristic });
    }
}

/// A live GATT link to one device.
///
/// All commands return as soon as the request is queued. `Err` means the
/// request could not even be issued; otherwise the result arrives later
/// as a [`LinkEvent`].
pub trait GattLink: Send {
    /// Request service discovery. Completion is reported as
    /// [`LinkEventKind::ServicesDiscovered`].
    fn discover_services(&mut self) -> Result<()>;

    /// Whether a service with this UUID was discovered.
    fn has_service(&self, service: &Uuid) -> bool;

    /// Whether the characteristic was discovered.
    fn has_characteristic(&self, characteristic: SensorCharacteristic) -> bool;

    /// Enable notifications for the characteristic. A rejection after the
    /// request was issued is reported as [`LinkEventKind::SubscriptionFailed`].
    fn subscribe(&mut self, characteristic: SensorCharacteristic) -> Result<()>;

    /// Request a read. The value is reported as
    /// [`LinkEventKind::CharacteristicRead`].
    fn read(&mut self, characteristic: SensorCharacteristic) -> Result<()>;

    /// Request disconnection. Reported as
    /// [`LinkEventKind::LinkStateChanged`] with [`LinkState::Disconnected`].
    fn disconnect(&mut self) -> Result<()>;

    /// Release all resources held by the link. No further events are sent.
    fn close(&mut self);
}

/// Factory for [`GattLink`]s.
pub trait GattConnector: Send + Sync {
    /// Begin connecting to `address`.
    ///
    /// Returns immediately; the connection outcome is reported through
    /// `events` as a [`LinkEventKind::LinkStateChanged`].
    fn open(&self, address: DeviceAddress, events: LinkEventSender) -> Result<Box<dyn GattLink>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_next() {
        let generation = Generation::default();
        assert_eq!(generation.value(), 0);
        assert_eq!(generation.next().value(), 1);
        assert!(generation.next() > generation);
        assert_eq!(Generation::new(u64::MAX).next(), Generation::new(0));
        assert_eq!(Generation::new(7).to_string(), "#7");
    }

    #[test]
    fn test_sender_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = LinkEventSender::new(Generation::new(3), tx);

        sender.link_state_changed(LinkState::Connected);
        sender.characteristic_changed(
            SensorCharacteristic::Pressure,
            Bytes::from_static(&[0x64, 0x00]),
        );

        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::new(
                Generation::new(3),
                LinkEventKind::LinkStateChanged(LinkState::Connected)
            )
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation, Generation::new(3));
        assert!(matches!(
            event.kind,
            LinkEventKind::CharacteristicChanged {
                characteristic: SensorCharacteristic::Pressure,
                ..
            }
        ));
    }

    #[test]
    fn test_subscription_failed_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = LinkEventSender::new(Generation::new(2), tx);

        sender.subscription_failed(SensorCharacteristic::Battery);

        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::new(
                Generation::new(2),
                LinkEventKind::SubscriptionFailed {
                    characteristic: SensorCharacteristic::Battery
                }
            )
        );
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sender = LinkEventSender::new(Generation::new(1), tx);
        sender.services_discovered(true);
    }
}
