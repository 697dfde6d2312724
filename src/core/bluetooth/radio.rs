//! The radio seam
//! A `GattRadio` issues primitives and returns immediately; whatever the
//! primitive leads to is reported later as a `GattEvent` through the
//! `EventSink` the radio was built with. Primitives are called while the
//! engine lock is held and must never call back into the engine directly.

use log::error;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::events::GattEvent;
use crate::core::bluetooth::operation::WriteType;
use crate::core::bluetooth::types::DeviceId;

/// The radio refused to start a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RadioError(pub String);

impl RadioError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub trait GattRadio: Send + Sync {
    /// Opens a link. Reported by `ConnectionStateChanged`.
    fn connect(&self, device: &DeviceId) -> Result<(), RadioError>;

    /// Reported by `ServicesDiscovered`.
    fn discover_services(&self, device: &DeviceId) -> Result<(), RadioError>;

    /// Closes a live link. Reported by `ConnectionStateChanged`.
    fn disconnect(&self, device: &DeviceId) -> Result<(), RadioError>;

    /// Releases the local handle of a link. Synchronous, reports nothing.
    fn close(&self, device: &DeviceId);

    fn read_characteristic(&self, device: &DeviceId, characteristic: Uuid)
    -> Result<(), RadioError>;

    fn write_characteristic(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        write_type: WriteType,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    fn read_descriptor(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<(), RadioError>;

    fn write_descriptor(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    /// Toggles local delivery of updates for a characteristic. Synchronous.
    fn set_notification(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), RadioError>;

    /// Reported by `MtuChanged`.
    fn request_mtu(&self, device: &DeviceId, mtu: u16) -> Result<(), RadioError>;
}

/// Where a radio delivers its completion events
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<GattEvent>,
}

impl EventSink {
    pub fn emit(&self, event: GattEvent) {
        if let Err(e) = self.sender.send(event) {
            error!("Event pump is gone, dropping {:?}", e.0);
        }
    }
}

/// Creates the channel between a radio and the engine's event pump.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<GattEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSink { sender }, receiver)
}
