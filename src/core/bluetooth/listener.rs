//! Connection event listeners
//! Listeners are held weakly: the registry never extends their lifetime and
//! drops dead entries whenever a listener is registered or unregistered.

use std::sync::{Arc, Weak};

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::operation::OperationKind;
use crate::core::bluetooth::types::{DeviceId, GattService};
use crate::error::BleError;

/// Receives connection and GATT events from the engine.
/// Every method has a no-op default; implement only what you need.
/// Callbacks run outside the engine lock, so they may submit new operations.
pub trait ConnectionEventListener: Send + Sync {
    fn on_connection_setup_complete(&self, _device: &DeviceId, _services: &[GattService]) {}

    fn on_disconnect(&self, _device: &DeviceId) {}

    fn on_characteristic_read(&self, _device: &DeviceId, _characteristic: Uuid, _value: &[u8]) {}

    fn on_characteristic_write(&self, _device: &DeviceId, _characteristic: Uuid, _value: &[u8]) {}

    fn on_characteristic_changed(&self, _device: &DeviceId, _characteristic: Uuid, _value: &[u8]) {
    }

    fn on_descriptor_read(
        &self,
        _device: &DeviceId,
        _characteristic: Uuid,
        _descriptor: Uuid,
        _value: &[u8],
    ) {
    }

    fn on_descriptor_write(
        &self,
        _device: &DeviceId,
        _characteristic: Uuid,
        _descriptor: Uuid,
        _value: &[u8],
    ) {
    }

    fn on_notifications_enabled(&self, _device: &DeviceId, _characteristic: Uuid) {}

    fn on_notifications_disabled(&self, _device: &DeviceId, _characteristic: Uuid) {}

    fn on_mtu_changed(&self, _device: &DeviceId, _mtu: u16) {}

    /// A dispatched operation failed or was force-completed.
    fn on_operation_failed(&self, _device: &DeviceId, _kind: OperationKind, _error: &BleError) {}
}

/// An event waiting to be delivered to listeners once the engine lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    ConnectionSetupComplete {
        device: DeviceId,
        services: Vec<GattService>,
    },
    Disconnect {
        device: DeviceId,
    },
    CharacteristicRead {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicWrite {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicChanged {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorRead {
        device: DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    DescriptorWrite {
        device: DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    NotificationsEnabled {
        device: DeviceId,
        characteristic: Uuid,
    },
    NotificationsDisabled {
        device: DeviceId,
        characteristic: Uuid,
    },
    MtuChanged {
        device: DeviceId,
        mtu: u16,
    },
    OperationFailed {
        device: DeviceId,
        kind: OperationKind,
        error: BleError,
    },
}

impl ListenerEvent {
    /// Calls the matching listener method.
    pub fn deliver(&self, listener: &dyn ConnectionEventListener) {
        match self {
            Self::ConnectionSetupComplete { device, services } => {
                listener.on_connection_setup_complete(device, services)
            }
            Self::Disconnect { device } => listener.on_disconnect(device),
            Self::CharacteristicRead {
                device,
                characteristic,
                value,
            } => listener.on_characteristic_read(device, *characteristic, value),
            Self::CharacteristicWrite {
                device,
                characteristic,
                value,
            } => listener.on_characteristic_write(device, *characteristic, value),
            Self::CharacteristicChanged {
                device,
                characteristic,
                value,
            } => listener.on_characteristic_changed(device, *characteristic, value),
            Self::DescriptorRead {
                device,
                characteristic,
                descriptor,
                value,
            } => listener.on_descriptor_read(device, *characteristic, *descriptor, value),
            Self::DescriptorWrite {
                device,
                characteristic,
                descriptor,
                value,
            } => listener.on_descriptor_write(device, *characteristic, *descriptor, value),
            Self::NotificationsEnabled {
                device,
                characteristic,
            } => listener.on_notifications_enabled(device, *characteristic),
            Self::NotificationsDisabled {
                device,
                characteristic,
            } => listener.on_notifications_disabled(device, *characteristic),
            Self::MtuChanged { device, mtu } => listener.on_mtu_changed(device, *mtu),
            Self::OperationFailed {
                device,
                kind,
                error,
            } => listener.on_operation_failed(device, *kind, error),
        }
    }
}

/// Weakly-held set of listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Weak<dyn ConnectionEventListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` unless it is already registered. Returns whether it was added.
    pub fn register(&mut self, listener: Weak<dyn ConnectionEventListener>) -> bool {
        self.prune();
        if self.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        debug!("Added listener, {} listeners total", self.listeners.len());
        true
    }

    /// Removes `listener`. Returns whether it was registered.
    pub fn unregister(&mut self, listener: &Weak<dyn ConnectionEventListener>) -> bool {
        self.prune();
        let before = self.listeners.len();
        self.listeners.retain(|l| !Weak::ptr_eq(l, listener));
        let removed = self.listeners.len() != before;
        if removed {
            debug!("Removed listener, {} listeners total", self.listeners.len());
        }
        removed
    }

    /// Number of tracked entries, dead ones included until the next prune.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Strong references to every listener that is still alive.
    pub fn snapshot(&self) -> Vec<Arc<dyn ConnectionEventListener>> {
        self.listeners.iter().filter_map(Weak::upgrade).collect()
    }

    fn contains(&self, listener: &Weak<dyn ConnectionEventListener>) -> bool {
        self.listeners.iter().any(|l| Weak::ptr_eq(l, listener))
    }

    fn prune(&mut self) {
        self.listeners.retain(|l| l.strong_count() > 0);
    }
}

/// Delivers `events` in order to every listener in `listeners`.
pub fn dispatch_events(listeners: &[Arc<dyn ConnectionEventListener>], events: &[ListenerEvent]) {
    for event in events {
        for listener in listeners {
            event.deliver(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        disconnects: Mutex<Vec<DeviceId>>,
    }

    impl ConnectionEventListener for Recorder {
        fn on_disconnect(&self, device: &DeviceId) {
            self.disconnects.lock().unwrap().push(device.clone());
        }
    }

    fn weak_of(listener: &Arc<Recorder>) -> Weak<dyn ConnectionEventListener> {
        Arc::downgrade(listener) as Weak<Recorder>
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = ListenerRegistry::new();
        let listener = Arc::new(Recorder::default());

        assert!(registry.register(weak_of(&listener)));
        assert!(!registry.register(weak_of(&listener)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_unknown_listener_is_a_no_op() {
        let mut registry = ListenerRegistry::new();
        let registered = Arc::new(Recorder::default());
        let stranger = Arc::new(Recorder::default());
        registry.register(weak_of(&registered));

        assert!(!registry.unregister(&weak_of(&stranger)));
        assert!(registry.unregister(&weak_of(&registered)));
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_listener_is_pruned_on_next_registration() {
        let mut registry = ListenerRegistry::new();
        let short_lived = Arc::new(Recorder::default());
        let long_lived = Arc::new(Recorder::default());
        registry.register(weak_of(&short_lived));
        drop(short_lived);

        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot().is_empty());

        registry.register(weak_of(&long_lived));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn events_reach_live_listeners() {
        let mut registry = ListenerRegistry::new();
        let listener = Arc::new(Recorder::default());
        registry.register(weak_of(&listener));
        let device = DeviceId::from("AA:BB:CC:DD:EE:FF");

        dispatch_events(
            &registry.snapshot(),
            &[ListenerEvent::Disconnect {
                device: device.clone(),
            }],
        );

        assert_eq!(*listener.disconnects.lock().unwrap(), vec![device]);
    }
}
