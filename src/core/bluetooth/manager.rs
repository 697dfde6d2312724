//! Connection manager
//! The public face of the engine. Every entry point takes the same lock, so
//! submissions and completions are serialized and at most one operation is
//! ever in flight across all devices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::bluetooth::capability::CapabilitySet;
use crate::core::bluetooth::constants::{
    DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
    UUID_CLIENT_CHARACTERISTIC_CONFIG,
};
use crate::core::bluetooth::events::GattEvent;
use crate::core::bluetooth::listener::{
    ConnectionEventListener, ListenerEvent, ListenerRegistry, dispatch_events,
};
use crate::core::bluetooth::operation::{Dispatch, Operation, OperationKind, WriteType};
use crate::core::bluetooth::radio::{GattRadio, RadioError};
use crate::core::bluetooth::registry::ConnectionRegistry;
use crate::core::bluetooth::scheduler::OperationScheduler;
use crate::core::bluetooth::types::{
    DeviceId, GattCharacteristic, GattService, LinkState, Session,
};
use crate::error::BleError;

/// Everything guarded by the engine lock
#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) scheduler: OperationScheduler,
    pub(crate) listeners: ListenerRegistry,
}

/// Handle to the engine. Cheap to clone; all clones share one pipeline.
#[derive(Clone)]
pub struct ConnectionManager {
    state: Arc<Mutex<EngineState>>,
    radio: Arc<dyn GattRadio>,
    config: Arc<EngineConfig>,
}

/// The engine state borrowed for one critical section. Listener events are
/// buffered here and delivered after the lock is released.
pub(crate) struct Pipeline<'a> {
    pub(crate) state: &'a mut EngineState,
    pub(crate) radio: &'a dyn GattRadio,
    pub(crate) config: &'a EngineConfig,
    pub(crate) events: Vec<ListenerEvent>,
}

impl ConnectionManager {
    pub fn new(radio: Arc<dyn GattRadio>, config: EngineConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            radio,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` inside the critical section, then fans out whatever listener
    /// events it produced.
    pub(crate) fn with_pipeline<R>(&self, f: impl FnOnce(&mut Pipeline<'_>) -> R) -> R {
        let (result, events, listeners) = {
            let mut guard = self.lock();
            let mut pipeline = Pipeline {
                state: &mut guard,
                radio: self.radio.as_ref(),
                config: &self.config,
                events: Vec::new(),
            };
            let result = f(&mut pipeline);
            let events = std::mem::take(&mut pipeline.events);
            let listeners = if events.is_empty() {
                Vec::new()
            } else {
                guard.listeners.snapshot()
            };
            (result, events, listeners)
        };
        dispatch_events(&listeners, &events);
        result
    }

    // - Listener registration

    /// Registers a listener without taking ownership of it. Returns false if
    /// it was already registered.
    pub fn register_listener<L: ConnectionEventListener + 'static>(&self, listener: &Arc<L>) -> bool {
        let weak: Weak<dyn ConnectionEventListener> = Arc::downgrade(listener) as Weak<L>;
        self.lock().listeners.register(weak)
    }

    pub fn unregister_listener<L: ConnectionEventListener + 'static>(
        &self,
        listener: &Arc<L>,
    ) -> bool {
        let weak: Weak<dyn ConnectionEventListener> = Arc::downgrade(listener) as Weak<L>;
        self.lock().listeners.unregister(&weak)
    }

    /// Tracked listener entries, including dead ones not yet pruned.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    // - Registry queries

    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.lock().registry.is_connected(device)
    }

    pub fn session_for(&self, device: &DeviceId) -> Option<Session> {
        self.lock().registry.session_for(device).cloned()
    }

    pub fn services_on_device(&self, device: &DeviceId) -> Option<Vec<GattService>> {
        self.lock()
            .registry
            .services_on_device(device)
            .map(<[GattService]>::to_vec)
    }

    pub fn link_state(&self, device: &DeviceId) -> LinkState {
        self.lock().registry.link_state(device)
    }

    pub fn pending_operation(&self) -> Option<Operation> {
        self.lock().scheduler.pending().cloned()
    }

    pub fn queued_operations(&self) -> Vec<Operation> {
        self.lock().scheduler.queued().cloned().collect()
    }

    // - Requests

    pub fn connect(&self, device: &DeviceId) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            match p.state.registry.link_state(device) {
                LinkState::Ready => return Err(rejected(BleError::AlreadyConnected(device.clone()))),
                LinkState::Disconnected | LinkState::Failed => {}
                _ => return Err(rejected(BleError::ConnectionInProgress(device.clone()))),
            }
            if p.state.scheduler.has_operation(device, OperationKind::Connect) {
                return Err(rejected(BleError::ConnectionInProgress(device.clone())));
            }
            p.submit(Operation::Connect {
                device: device.clone(),
            });
            Ok(())
        })
    }

    /// Tears down the connection to `device`.
    pub fn disconnect(&self, device: &DeviceId) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            if p.state.registry.link(device).is_none() {
                return Err(rejected(BleError::NotConnected(device.clone())));
            }
            if p.state.scheduler.has_operation(device, OperationKind::Disconnect) {
                debug!("Disconnect of {} already scheduled", device);
                return Ok(());
            }
            p.submit(Operation::Disconnect {
                device: device.clone(),
            });
            Ok(())
        })
    }

    pub fn read_characteristic(&self, device: &DeviceId, characteristic: Uuid) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            let caps = p.characteristic_capabilities(device, characteristic)?;
            if !caps.readable {
                return Err(rejected(BleError::MissingCapability {
                    attribute: characteristic,
                    capability: "read",
                }));
            }
            p.submit(Operation::CharacteristicRead {
                device: device.clone(),
                characteristic,
            });
            Ok(())
        })
    }

    /// Writes with response when the characteristic allows it, otherwise
    /// without response.
    pub fn write_characteristic(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            let caps = p.characteristic_capabilities(device, characteristic)?;
            let write_type = if caps.writable {
                WriteType::WithResponse
            } else if caps.writable_without_response {
                WriteType::WithoutResponse
            } else {
                return Err(rejected(BleError::MissingCapability {
                    attribute: characteristic,
                    capability: "write",
                }));
            };
            p.submit(Operation::CharacteristicWrite {
                device: device.clone(),
                characteristic,
                write_type,
                payload: payload.to_vec(),
            });
            Ok(())
        })
    }

    pub fn read_descriptor(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            let (caps, _) = p.descriptor_capabilities(device, characteristic, descriptor)?;
            if !caps.readable {
                return Err(rejected(BleError::MissingCapability {
                    attribute: descriptor,
                    capability: "read",
                }));
            }
            p.submit(Operation::DescriptorRead {
                device: device.clone(),
                characteristic,
                descriptor,
            });
            Ok(())
        })
    }

    /// The configuration descriptor is always writable, whatever its permissions say.
    pub fn write_descriptor(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            let (caps, is_config) = p.descriptor_capabilities(device, characteristic, descriptor)?;
            if !caps.writable && !is_config {
                return Err(rejected(BleError::MissingCapability {
                    attribute: descriptor,
                    capability: "write",
                }));
            }
            p.submit(Operation::DescriptorWrite {
                device: device.clone(),
                characteristic,
                descriptor,
                payload: payload.to_vec(),
            });
            Ok(())
        })
    }

    pub fn enable_notifications(&self, device: &DeviceId, characteristic: Uuid) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            p.require_updates(device, characteristic)?;
            p.submit(Operation::EnableNotifications {
                device: device.clone(),
                characteristic,
            });
            Ok(())
        })
    }

    pub fn disable_notifications(&self, device: &DeviceId, characteristic: Uuid) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            p.require_updates(device, characteristic)?;
            p.submit(Operation::DisableNotifications {
                device: device.clone(),
                characteristic,
            });
            Ok(())
        })
    }

    /// Requests an MTU; the size is clamped to [23, 517].
    pub fn request_mtu(&self, device: &DeviceId, mtu: u16) -> Result<(), BleError> {
        self.with_pipeline(|p| {
            if !p.state.registry.is_connected(device) {
                return Err(rejected(BleError::NotConnected(device.clone())));
            }
            p.submit(Operation::mtu_request(device.clone(), mtu));
            Ok(())
        })
    }

    // - Completions

    /// Feeds one completion event from the radio into the engine.
    pub fn handle_event(&self, event: GattEvent) {
        self.with_pipeline(|p| p.handle_event(event));
    }

    /// Force-fails the pending operation if it has been in flight longer than
    /// the configured timeout. Returns whether anything was expired.
    pub fn expire_stalled_operation(&self, now: Instant) -> bool {
        let Some(timeout) = self.config.operation_timeout() else {
            return false;
        };
        self.with_pipeline(|p| {
            let stalled = p
                .state
                .scheduler
                .pending_for(now)
                .is_some_and(|age| age >= timeout);
            let Some(operation) = p.state.scheduler.pending().cloned().filter(|_| stalled) else {
                return false;
            };
            warn!("{} got no completion within {:?}, giving up", operation, timeout);
            p.teardown(operation.device(), BleError::Timeout(operation.kind()));
            true
        })
    }

    /// Drains radio events on a tokio task until `cancel` fires or the radio
    /// side of the channel is dropped.
    pub fn spawn_event_pump(
        &self,
        mut events: UnboundedReceiver<GattEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        let watchdog_enabled = self.config.operation_timeout().is_some();
        let watchdog_interval = self.config.watchdog_interval();

        tokio::spawn(async move {
            let mut watchdog = tokio::time::interval(watchdog_interval);
            info!("Event pump started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Event pump cancelled");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => manager.handle_event(event),
                        None => {
                            info!("Radio event channel closed");
                            break;
                        }
                    },
                    _ = watchdog.tick(), if watchdog_enabled => {
                        manager.expire_stalled_operation(Instant::now());
                    }
                }
            }
            info!("Event pump stopped");
        })
    }
}

impl Pipeline<'_> {
    pub(crate) fn emit(&mut self, event: ListenerEvent) {
        self.events.push(event);
    }

    /// Logs a failure of a dispatched operation and tells listeners.
    pub(crate) fn fail(&mut self, device: &DeviceId, kind: OperationKind, error: BleError) {
        error!("{} on {} failed: {}", kind, device, error);
        self.emit(ListenerEvent::OperationFailed {
            device: device.clone(),
            kind,
            error,
        });
    }

    fn ready_session(&self, device: &DeviceId) -> Result<&Session, BleError> {
        self.state
            .registry
            .session_for(device)
            .ok_or_else(|| BleError::NotConnected(device.clone()))
    }

    fn find_characteristic(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
    ) -> Result<&GattCharacteristic, BleError> {
        self.ready_session(device)?
            .characteristic(characteristic)
            .ok_or(BleError::CharacteristicNotFound(characteristic))
    }

    fn characteristic_capabilities(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
    ) -> Result<CapabilitySet, BleError> {
        self.find_characteristic(device, characteristic)
            .map(GattCharacteristic::capabilities)
            .map_err(rejected)
    }

    /// Capabilities of a descriptor and whether it is the configuration descriptor.
    fn descriptor_capabilities(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<(CapabilitySet, bool), BleError> {
        let lookup = self.find_characteristic(device, characteristic).and_then(|c| {
            c.descriptor(descriptor)
                .map(|d| (d.capabilities(), d.is_config_descriptor()))
                .ok_or(BleError::DescriptorNotFound {
                    characteristic,
                    descriptor,
                })
        });
        lookup.map_err(rejected)
    }

    fn require_updates(&self, device: &DeviceId, characteristic: Uuid) -> Result<(), BleError> {
        let caps = self.characteristic_capabilities(device, characteristic)?;
        if !caps.supports_updates() {
            return Err(rejected(BleError::MissingCapability {
                attribute: characteristic,
                capability: "notifications/indications",
            }));
        }
        Ok(())
    }

    // - Scheduling

    /// Queues `operation` and dispatches it right away if nothing is in flight.
    pub(crate) fn submit(&mut self, operation: Operation) {
        if self.state.scheduler.enqueue(operation) {
            self.drive();
        }
    }

    /// Clears the pending slot and moves on to the next queued operation.
    pub(crate) fn signal_completion(&mut self) {
        self.state.scheduler.complete();
        self.drive();
    }

    /// Dispatches queued operations until one has to wait for the radio.
    pub(crate) fn drive(&mut self) {
        while self.state.scheduler.is_idle() {
            let Some(operation) = self.state.scheduler.begin_next().cloned() else {
                return;
            };
            match self.dispatch(&operation) {
                Dispatch::AwaitingHardwareCallback => return,
                Dispatch::ImmediateCompletion => {
                    self.state.scheduler.complete();
                }
            }
        }
    }

    fn dispatch(&mut self, operation: &Operation) -> Dispatch {
        let device = operation.device();
        let kind = operation.kind();

        let issued = match operation {
            Operation::Connect { device } => {
                info!("Connecting to {}", device);
                self.state.registry.open(device.clone());
                let issued = self.radio.connect(device);
                if issued.is_err() {
                    self.state.registry.remove(device);
                }
                issued.map_err(|e| radio_error(kind, e))
            }
            Operation::Disconnect { device } => return self.dispatch_disconnect(device),
            _ if self.state.registry.session_for(device).is_none() => {
                Err(BleError::NotConnected(device.clone()))
            }
            Operation::CharacteristicRead {
                device,
                characteristic,
            } => self.dispatch_characteristic_read(device, *characteristic),
            Operation::CharacteristicWrite {
                device,
                characteristic,
                write_type,
                payload,
            } => self.dispatch_characteristic_write(device, *characteristic, *write_type, payload),
            Operation::DescriptorRead {
                device,
                characteristic,
                descriptor,
            } => self.dispatch_descriptor_read(device, *characteristic, *descriptor),
            Operation::DescriptorWrite {
                device,
                characteristic,
                descriptor,
                payload,
            } => self.dispatch_descriptor_write(device, *characteristic, *descriptor, payload),
            Operation::EnableNotifications {
                device,
                characteristic,
            } => self.dispatch_notification_toggle(device, *characteristic, true),
            Operation::DisableNotifications {
                device,
                characteristic,
            } => self.dispatch_notification_toggle(device, *characteristic, false),
            Operation::MtuRequest { device, mtu } => self
                .radio
                .request_mtu(device, *mtu)
                .map_err(|e| radio_error(kind, e)),
        };

        match issued {
            Ok(()) => {
                debug!("Dispatched {}", operation);
                Dispatch::AwaitingHardwareCallback
            }
            Err(e) => {
                self.fail(device, kind, e);
                Dispatch::ImmediateCompletion
            }
        }
    }

    fn dispatch_disconnect(&mut self, device: &DeviceId) -> Dispatch {
        let Some(link) = self.state.registry.link(device) else {
            self.fail(
                device,
                OperationKind::Disconnect,
                BleError::NotConnected(device.clone()),
            );
            return Dispatch::ImmediateCompletion;
        };
        if link.state == LinkState::Failed {
            // Link is already down, nothing will report back
            self.finish_disconnect(device);
            return Dispatch::ImmediateCompletion;
        }

        info!("Disconnecting from {}", device);
        match self.radio.disconnect(device) {
            Ok(()) => Dispatch::AwaitingHardwareCallback,
            Err(e) => {
                warn!("Radio refused to disconnect {}: {}, closing locally", device, e);
                self.finish_disconnect(device);
                Dispatch::ImmediateCompletion
            }
        }
    }

    fn dispatch_characteristic_read(&mut self, device: &DeviceId, characteristic: Uuid) -> Result<(), BleError> {
        let caps = self.find_characteristic(device, characteristic)?.capabilities();
        if !caps.readable {
            return Err(BleError::MissingCapability {
                attribute: characteristic,
                capability: "read",
            });
        }
        self.radio
            .read_characteristic(device, characteristic)
            .map_err(|e| radio_error(OperationKind::CharacteristicRead, e))
    }

    fn dispatch_characteristic_write(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        write_type: WriteType,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let caps = self.find_characteristic(device, characteristic)?.capabilities();
        let supported = match write_type {
            WriteType::WithResponse => caps.writable,
            WriteType::WithoutResponse => caps.writable_without_response,
        };
        if !supported {
            return Err(BleError::MissingCapability {
                attribute: characteristic,
                capability: "write",
            });
        }
        self.radio
            .write_characteristic(device, characteristic, write_type, payload)
            .map_err(|e| radio_error(OperationKind::CharacteristicWrite, e))
    }

    fn dispatch_descriptor_read(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<(), BleError> {
        let found = self
            .find_characteristic(device, characteristic)?
            .descriptor(descriptor)
            .ok_or(BleError::DescriptorNotFound {
                characteristic,
                descriptor,
            })?;
        if !found.capabilities().readable {
            return Err(BleError::MissingCapability {
                attribute: descriptor,
                capability: "read",
            });
        }
        self.radio
            .read_descriptor(device, characteristic, descriptor)
            .map_err(|e| radio_error(OperationKind::DescriptorRead, e))
    }

    fn dispatch_descriptor_write(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let found = self
            .find_characteristic(device, characteristic)?
            .descriptor(descriptor)
            .ok_or(BleError::DescriptorNotFound {
                characteristic,
                descriptor,
            })?;
        if !found.capabilities().writable && !found.is_config_descriptor() {
            return Err(BleError::MissingCapability {
                attribute: descriptor,
                capability: "write",
            });
        }
        self.radio
            .write_descriptor(device, characteristic, descriptor, payload)
            .map_err(|e| radio_error(OperationKind::DescriptorWrite, e))
    }

    /// Flips the local notification flag, then writes the configuration descriptor.
    fn dispatch_notification_toggle(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), BleError> {
        let kind = if enable {
            OperationKind::EnableNotifications
        } else {
            OperationKind::DisableNotifications
        };
        let found = self.find_characteristic(device, characteristic)?;
        let caps = found.capabilities();
        if !caps.supports_updates() {
            return Err(BleError::MissingCapability {
                attribute: characteristic,
                capability: "notifications/indications",
            });
        }
        if found.config_descriptor().is_none() {
            return Err(BleError::DescriptorNotFound {
                characteristic,
                descriptor: UUID_CLIENT_CHARACTERISTIC_CONFIG,
            });
        }
        let payload = match (enable, caps.indicatable) {
            (false, _) => DISABLE_NOTIFICATION_VALUE,
            (true, true) => ENABLE_INDICATION_VALUE,
            (true, false) => ENABLE_NOTIFICATION_VALUE,
        };

        self.radio
            .set_notification(device, characteristic, enable)
            .map_err(|e| radio_error(kind, e))?;
        self.set_notifying(device, characteristic, enable);

        let written = self.radio.write_descriptor(
            device,
            characteristic,
            UUID_CLIENT_CHARACTERISTIC_CONFIG,
            &payload,
        );
        if let Err(e) = written {
            self.set_notifying(device, characteristic, !enable);
            return Err(radio_error(kind, e));
        }
        Ok(())
    }

    pub(crate) fn set_notifying(&mut self, device: &DeviceId, characteristic: Uuid, notifying: bool) {
        if let Some(found) = self
            .state
            .registry
            .link_mut(device)
            .and_then(|s| s.characteristic_mut(characteristic))
        {
            found.notifying = notifying;
        }
    }

    // - Teardown

    /// Releases the radio handle, forgets the session and tells listeners.
    pub(crate) fn finish_disconnect(&mut self, device: &DeviceId) {
        info!("Closing connection to {}", device);
        self.radio.close(device);
        self.state.registry.remove(device);
        self.emit(ListenerEvent::Disconnect {
            device: device.clone(),
        });
    }

    /// Handles a link that failed. The in-flight operation on `device`, if
    /// any, is completed as failed and a Disconnect is queued to clean up.
    pub(crate) fn teardown(&mut self, device: &DeviceId, reason: BleError) {
        let pending_here = self
            .state
            .scheduler
            .pending()
            .filter(|op| op.targets(device))
            .map(Operation::kind);

        if pending_here == Some(OperationKind::Disconnect) {
            self.finish_disconnect(device);
            self.signal_completion();
            return;
        }

        if let Some(link) = self.state.registry.link_mut(device) {
            link.state = LinkState::Failed;
            if !self.state.scheduler.has_operation(device, OperationKind::Disconnect) {
                info!("Scheduling teardown of {}", device);
                self.state.scheduler.enqueue(Operation::Disconnect {
                    device: device.clone(),
                });
            }
        }

        match pending_here {
            Some(kind) => {
                self.fail(device, kind, reason);
                self.signal_completion();
            }
            None => self.drive(),
        }
    }
}

/// Logs a synchronous precondition failure.
fn rejected(error: BleError) -> BleError {
    error!("Rejected request: {}", error);
    error
}

fn radio_error(kind: OperationKind, error: RadioError) -> BleError {
    BleError::Radio {
        kind,
        reason: error.0,
    }
}
