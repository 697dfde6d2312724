//! Bluetooth LE central engine
//! Serializes every GATT operation across all devices through one queue,
//! tracks open sessions and fans completion events out to listeners.

pub mod capability;
mod completion;
pub mod constants;
pub mod events;
pub mod listener;
mod manager;
pub mod operation;
pub mod radio;
mod registry;
mod scheduler;
pub mod types;

#[cfg(feature = "bluest")]
mod bluest_radio;

pub use capability::{CapabilitySet, CharacteristicProperties, DescriptorPermissions};
pub use events::{ConfigDescriptorValue, ConnectionChange, GattEvent, GattStatus, ProfileState};
pub use listener::{ConnectionEventListener, ListenerEvent};
pub use manager::ConnectionManager;
pub use operation::{Dispatch, Operation, OperationKind, WriteType, clamp_mtu};
pub use radio::{EventSink, GattRadio, RadioError, event_channel};
pub use registry::ConnectionRegistry;
pub use scheduler::OperationScheduler;
pub use types::{
    DeviceId, GattCharacteristic, GattDescriptor, GattService, LinkState, Session, find_characteristic,
    log_gatt_table,
};

#[cfg(feature = "bluest")]
pub use bluest_radio::BluestRadio;
