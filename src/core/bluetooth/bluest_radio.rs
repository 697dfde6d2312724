//! Radio backed by the platform Bluetooth stack through `bluest`
//! Every request is issued on a tokio task; its outcome comes back through the
//! event sink, never through the call that started it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use bluest::{Adapter, Characteristic, ConnectionEvent, Descriptor, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::capability::{CharacteristicProperties, DescriptorPermissions};
use crate::core::bluetooth::constants::{GATT_ERROR, GATT_SUCCESS, UUID_CLIENT_CHARACTERISTIC_CONFIG};
use crate::core::bluetooth::events::{GattEvent, ProfileState};
use crate::core::bluetooth::operation::{WriteType, clamp_mtu};
use crate::core::bluetooth::radio::{EventSink, GattRadio, RadioError};
use crate::core::bluetooth::types::{
    DeviceId, GattCharacteristic, GattDescriptor, GattService, is_config_descriptor,
};

/// Attribute handles resolved during service discovery
#[derive(Default)]
struct LinkHandles {
    characteristics: HashMap<Uuid, Characteristic>,
    descriptors: HashMap<(Uuid, Uuid), Descriptor>,
    subscriptions: HashMap<Uuid, CancellationToken>,
    /// Subscriptions waiting for their configuration write before they start
    config_writes: HashMap<Uuid, oneshot::Sender<Vec<u8>>>,
    watcher: Option<CancellationToken>,
}

impl LinkHandles {
    fn cancel_all(&mut self) {
        for (_, token) in self.subscriptions.drain() {
            token.cancel();
        }
        self.config_writes.clear();
        if let Some(token) = self.watcher.take() {
            token.cancel();
        }
    }
}

#[derive(Clone)]
pub struct BluestRadio {
    adapter: Adapter,
    sink: EventSink,
    runtime: Handle,
    devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
    links: Arc<Mutex<HashMap<DeviceId, LinkHandles>>>,
}

impl BluestRadio {
    /// Must be called from within a tokio runtime.
    pub fn new(adapter: Adapter, sink: EventSink) -> Self {
        Self {
            adapter,
            sink,
            runtime: Handle::current(),
            devices: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Makes a platform device addressable by the engine.
    /// Entries stay until [`BluestRadio::forget`] so a closed link can be reconnected.
    pub fn track(&self, device: Device) -> DeviceId {
        let id = DeviceId::new(device.id().to_string());
        debug!("Tracking {} ({:?})", id, device.name().ok());
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), device);
        id
    }

    /// Drops a tracked device together with any handles still held for it.
    pub fn forget(&self, id: &DeviceId) {
        self.close(id);
        if self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
        {
            debug!("Forgot {}", id);
        }
    }

    fn device(&self, id: &DeviceId) -> Result<Device, RadioError> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| RadioError::new(format!("unknown device {}", id)))
    }

    fn characteristic(&self, id: &DeviceId, uuid: Uuid) -> Result<Characteristic, RadioError> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|link| link.characteristics.get(&uuid))
            .cloned()
            .ok_or_else(|| RadioError::new(format!("no handle for {} on {}", uuid, id)))
    }

    fn descriptor(&self, id: &DeviceId, characteristic: Uuid, uuid: Uuid) -> Result<Descriptor, RadioError> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|link| link.descriptors.get(&(characteristic, uuid)))
            .cloned()
            .ok_or_else(|| RadioError::new(format!("no handle for {} on {}", uuid, id)))
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }

    /// Reports unexpected link loss for `id` until cancelled.
    fn watch_connection(&self, id: DeviceId, device: Device) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();

        self.spawn(async move {
            let mut events = match adapter.device_connection_events(&device).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Cannot watch connection of {}: {}", id, e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.next() => match event {
                        Some(ConnectionEvent::Disconnected) => {
                            sink.emit(GattEvent::ConnectionStateChanged {
                                device: id.clone(),
                                status: GATT_SUCCESS,
                                new_state: ProfileState::Disconnected,
                            });
                            break;
                        }
                        Some(ConnectionEvent::Connected) => {}
                        None => break,
                    },
                }
            }
            debug!("Stopped watching {}", id);
        });
        cancel
    }
}

async fn discover(device: &Device) -> Result<(Vec<GattService>, LinkHandles), bluest::Error> {
    let mut handles = LinkHandles::default();
    let mut services = Vec::new();

    for service in device.discover_services().await? {
        let mut gatt_service = GattService::new(service.uuid());
        for characteristic in service.discover_characteristics().await? {
            let props = characteristic.properties().await?;
            let mut bits = CharacteristicProperties::empty();
            for (set, flag) in [
                (props.broadcast, CharacteristicProperties::BROADCAST),
                (props.read, CharacteristicProperties::READ),
                (props.write_without_response, CharacteristicProperties::WRITE_NO_RESPONSE),
                (props.write, CharacteristicProperties::WRITE),
                (props.notify, CharacteristicProperties::NOTIFY),
                (props.indicate, CharacteristicProperties::INDICATE),
                (props.authenticated_signed_writes, CharacteristicProperties::SIGNED_WRITE),
                (props.extended_properties, CharacteristicProperties::EXTENDED_PROPS),
            ] {
                if set {
                    bits = bits | flag;
                }
            }

            let uuid = characteristic.uuid();
            let mut gatt_characteristic = GattCharacteristic::new(uuid, bits);
            for descriptor in characteristic.discover_descriptors().await? {
                // The platform does not expose descriptor permissions
                gatt_characteristic = gatt_characteristic.with_descriptor(GattDescriptor::new(
                    descriptor.uuid(),
                    DescriptorPermissions::READ | DescriptorPermissions::WRITE,
                ));
                handles.descriptors.insert((uuid, descriptor.uuid()), descriptor);
            }
            handles.characteristics.insert(uuid, characteristic);
            gatt_service = gatt_service.with_characteristic(gatt_characteristic);
        }
        services.push(gatt_service);
    }
    Ok((services, handles))
}

fn status_of<T>(result: &Result<T, bluest::Error>, what: &str, id: &DeviceId) -> u8 {
    match result {
        Ok(_) => GATT_SUCCESS,
        Err(e) => {
            error!("{} on {} failed: {}", what, id, e);
            GATT_ERROR
        }
    }
}

impl GattRadio for BluestRadio {
    fn connect(&self, id: &DeviceId) -> Result<(), RadioError> {
        let device = self.device(id)?;
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        let radio = self.clone();
        let id = id.clone();
        // close() removes this entry; a late connect result must not recreate it
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default();

        self.spawn(async move {
            let result = if device.is_connected().await {
                info!("{} is already connected at the platform level", id);
                Ok(())
            } else {
                adapter.connect_device(&device).await
            };
            let status = status_of(&result, "Connect", &id);
            if status == GATT_SUCCESS {
                let mut links = radio.links.lock().unwrap_or_else(PoisonError::into_inner);
                match links.get_mut(&id) {
                    Some(link) => link.watcher = Some(radio.watch_connection(id.clone(), device)),
                    None => debug!("{} was released while connecting", id),
                }
            }
            sink.emit(GattEvent::ConnectionStateChanged {
                device: id,
                status,
                new_state: if status == GATT_SUCCESS {
                    ProfileState::Connected
                } else {
                    ProfileState::Disconnected
                },
            });
        });
        Ok(())
    }

    fn discover_services(&self, id: &DeviceId) -> Result<(), RadioError> {
        let device = self.device(id)?;
        let sink = self.sink.clone();
        let links = self.links.clone();
        let id = id.clone();

        self.spawn(async move {
            let (status, services) = match discover(&device).await {
                Ok((services, handles)) => {
                    let mut links = links.lock().unwrap_or_else(PoisonError::into_inner);
                    match links.get_mut(&id) {
                        Some(link) => {
                            link.characteristics = handles.characteristics;
                            link.descriptors = handles.descriptors;
                            (GATT_SUCCESS, services)
                        }
                        None => {
                            warn!("{} was released during service discovery", id);
                            (GATT_ERROR, Vec::new())
                        }
                    }
                }
                Err(e) => {
                    error!("Service discovery on {} failed: {}", id, e);
                    (GATT_ERROR, Vec::new())
                }
            };
            sink.emit(GattEvent::ServicesDiscovered {
                device: id,
                status,
                services,
            });
        });
        Ok(())
    }

    fn disconnect(&self, id: &DeviceId) -> Result<(), RadioError> {
        let device = self.device(id)?;
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        let id = id.clone();

        self.spawn(async move {
            let result = adapter.disconnect_device(&device).await;
            let status = status_of(&result, "Disconnect", &id);
            sink.emit(GattEvent::ConnectionStateChanged {
                device: id,
                status,
                new_state: ProfileState::Disconnected,
            });
        });
        Ok(())
    }

    fn close(&self, id: &DeviceId) {
        if let Some(mut link) = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
        {
            link.cancel_all();
        }
        debug!("Released handles for {}", id);
    }

    fn read_characteristic(&self, id: &DeviceId, characteristic: Uuid) -> Result<(), RadioError> {
        let handle = self.characteristic(id, characteristic)?;
        let sink = self.sink.clone();
        let id = id.clone();

        self.spawn(async move {
            let result = handle.read().await;
            let status = status_of(&result, "Characteristic read", &id);
            sink.emit(GattEvent::CharacteristicRead {
                device: id,
                characteristic,
                value: result.unwrap_or_default(),
                status,
            });
        });
        Ok(())
    }

    fn write_characteristic(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        write_type: WriteType,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let handle = self.characteristic(id, characteristic)?;
        let sink = self.sink.clone();
        let id = id.clone();
        let value = payload.to_vec();

        self.spawn(async move {
            let result = match write_type {
                WriteType::WithResponse => handle.write(&value).await,
                WriteType::WithoutResponse => handle.write_without_response(&value).await,
            };
            let status = status_of(&result, "Characteristic write", &id);
            sink.emit(GattEvent::CharacteristicWrite {
                device: id,
                characteristic,
                value,
                status,
            });
        });
        Ok(())
    }

    fn read_descriptor(&self, id: &DeviceId, characteristic: Uuid, descriptor: Uuid) -> Result<(), RadioError> {
        let handle = self.descriptor(id, characteristic, descriptor)?;
        let sink = self.sink.clone();
        let id = id.clone();

        self.spawn(async move {
            let result = handle.read().await;
            let status = status_of(&result, "Descriptor read", &id);
            sink.emit(GattEvent::DescriptorRead {
                device: id,
                characteristic,
                descriptor,
                value: result.unwrap_or_default(),
                status,
            });
        });
        Ok(())
    }

    fn write_descriptor(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let sink = self.sink.clone();
        let value = payload.to_vec();

        if is_config_descriptor(descriptor) {
            // The platform writes the configuration descriptor itself when a
            // subscription starts or stops. A starting subscription reports
            // the write once it is established, see set_notification.
            let waiting = self
                .links
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(id)
                .and_then(|link| link.config_writes.remove(&characteristic));
            match waiting {
                Some(subscription) => subscription.send(value).map_err(|_| {
                    RadioError::new(format!("subscription to {} on {} already ended", characteristic, id))
                })?,
                None => sink.emit(GattEvent::DescriptorWrite {
                    device: id.clone(),
                    characteristic,
                    descriptor,
                    value,
                    status: GATT_SUCCESS,
                }),
            }
            return Ok(());
        }

        let handle = self.descriptor(id, characteristic, descriptor)?;
        let id = id.clone();
        self.spawn(async move {
            let result = handle.write(&value).await;
            let status = status_of(&result, "Descriptor write", &id);
            sink.emit(GattEvent::DescriptorWrite {
                device: id,
                characteristic,
                descriptor,
                value,
                status,
            });
        });
        Ok(())
    }

    fn set_notification(&self, id: &DeviceId, characteristic: Uuid, enable: bool) -> Result<(), RadioError> {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        let link = links
            .get_mut(id)
            .ok_or_else(|| RadioError::new(format!("{} has no discovered services", id)))?;

        if let Some(previous) = link.subscriptions.remove(&characteristic) {
            previous.cancel();
        }
        link.config_writes.remove(&characteristic);
        if !enable {
            return Ok(());
        }

        let handle = link
            .characteristics
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| RadioError::new(format!("no handle for {} on {}", characteristic, id)))?;
        let cancel = CancellationToken::new();
        link.subscriptions.insert(characteristic, cancel.clone());
        let (config_tx, config_rx) = oneshot::channel();
        link.config_writes.insert(characteristic, config_tx);

        let sink = self.sink.clone();
        let id = id.clone();
        self.spawn(async move {
            let value = tokio::select! {
                _ = cancel.cancelled() => return,
                value = config_rx => match value {
                    Ok(value) => value,
                    Err(_) => return,
                },
            };
            let result = handle.notify().await;
            let status = status_of(&result, "Subscribe", &id);
            sink.emit(GattEvent::DescriptorWrite {
                device: id.clone(),
                characteristic,
                descriptor: UUID_CLIENT_CHARACTERISTIC_CONFIG,
                value,
                status,
            });
            let Ok(mut updates) = result else {
                return;
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.next() => match update {
                        Some(Ok(value)) => sink.emit(GattEvent::CharacteristicChanged {
                            device: id.clone(),
                            characteristic,
                            value,
                        }),
                        Some(Err(e)) => {
                            error!("Update stream of {} on {} failed: {}", characteristic, id, e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("Subscription to {} on {} ended", characteristic, id);
        });
        Ok(())
    }

    /// The platform negotiates the MTU on its own; this reports what it settled on.
    fn request_mtu(&self, id: &DeviceId, mtu: u16) -> Result<(), RadioError> {
        let handle = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|link| link.characteristics.values().next().cloned());
        let sink = self.sink.clone();
        let id = id.clone();

        self.spawn(async move {
            let negotiated = match handle.map(|c| c.max_write_len()) {
                Some(Ok(len)) => clamp_mtu(u16::try_from(len + 3).unwrap_or(u16::MAX)),
                Some(Err(e)) => {
                    warn!("Cannot query MTU of {}: {}", id, e);
                    mtu
                }
                None => mtu,
            };
            sink.emit(GattEvent::MtuChanged {
                device: id,
                mtu: negotiated,
                status: GATT_SUCCESS,
            });
        });
        Ok(())
    }
}
