//! Completion adapter
//! Translates raw radio events into registry updates, listener events and
//! pipeline advancement.

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::events::{ConfigDescriptorValue, ConnectionChange, GattEvent, GattStatus};
use crate::core::bluetooth::listener::ListenerEvent;
use crate::core::bluetooth::manager::Pipeline;
use crate::core::bluetooth::operation::{Operation, OperationKind};
use crate::core::bluetooth::types::{DeviceId, GattService, LinkState, is_config_descriptor, log_gatt_table};
use crate::error::BleError;
use crate::utils::to_hex_string;

impl Pipeline<'_> {
    pub(crate) fn handle_event(&mut self, event: GattEvent) {
        match event {
            GattEvent::ConnectionStateChanged {
                device,
                status,
                new_state,
            } => self.on_connection_state_changed(&device, ConnectionChange::classify(status, new_state)),
            GattEvent::ServicesDiscovered {
                device,
                status,
                services,
            } => self.on_services_discovered(&device, status, services),
            GattEvent::CharacteristicRead {
                device,
                characteristic,
                value,
                status,
            } => self.on_characteristic_read(&device, characteristic, value, status),
            GattEvent::CharacteristicWrite {
                device,
                characteristic,
                value,
                status,
            } => self.on_characteristic_write(&device, characteristic, value, status),
            GattEvent::CharacteristicChanged {
                device,
                characteristic,
                value,
            } => {
                debug!(
                    "{} on {} changed: {}",
                    characteristic,
                    device,
                    to_hex_string(&value)
                );
                self.emit(ListenerEvent::CharacteristicChanged {
                    device,
                    characteristic,
                    value,
                });
            }
            GattEvent::DescriptorRead {
                device,
                characteristic,
                descriptor,
                value,
                status,
            } => self.on_descriptor_read(&device, characteristic, descriptor, value, status),
            GattEvent::DescriptorWrite {
                device,
                characteristic,
                descriptor,
                value,
                status,
            } => self.on_descriptor_write(&device, characteristic, descriptor, value, status),
            GattEvent::MtuChanged { device, mtu, status } => self.on_mtu_changed(&device, mtu, status),
        }
    }

    /// Kind of the in-flight operation, if it targets `device`.
    fn pending_on(&self, device: &DeviceId) -> Option<OperationKind> {
        self.state
            .scheduler
            .pending()
            .filter(|op| op.targets(device))
            .map(Operation::kind)
    }

    /// Completes the in-flight operation if it is `kind` on `device`.
    fn complete_if(&mut self, device: &DeviceId, kind: OperationKind) {
        if self.pending_on(device) == Some(kind) {
            self.signal_completion();
        } else {
            debug!("Unsolicited {} completion from {}", kind, device);
        }
    }

    fn on_connection_state_changed(&mut self, device: &DeviceId, change: ConnectionChange) {
        match change {
            ConnectionChange::Connected if self.state.registry.link(device).is_none() => {
                warn!("Dropping late connection of untracked {}", device);
                if let Err(e) = self.radio.disconnect(device) {
                    warn!("Could not disconnect untracked {}: {}", device, e);
                }
                self.radio.close(device);
            }
            ConnectionChange::Connected => {
                info!("Connected to {}", device);
                self.state.registry.set_state(device, LinkState::Connected);
                match self.radio.discover_services(device) {
                    Ok(()) => {
                        self.state
                            .registry
                            .set_state(device, LinkState::ServiceDiscovering);
                    }
                    Err(e) => {
                        error!("Could not start service discovery on {}: {}", device, e);
                        self.teardown(
                            device,
                            BleError::Radio {
                                kind: OperationKind::Connect,
                                reason: e.0,
                            },
                        );
                    }
                }
            }
            ConnectionChange::Disconnected => {
                if self.pending_on(device) == Some(OperationKind::Disconnect) {
                    info!("Disconnected from {}", device);
                    self.finish_disconnect(device);
                    self.signal_completion();
                } else if self.state.registry.link(device).is_some() {
                    warn!("Link to {} dropped unexpectedly", device);
                    self.teardown(device, BleError::LinkLost(device.clone()));
                } else {
                    debug!("Ignoring disconnect of untracked {}", device);
                }
            }
            ConnectionChange::Abnormal(status) => {
                error!(
                    "Connection state change on {} failed with status {:#04X}",
                    device, status
                );
                let reason = if self.pending_on(device) == Some(OperationKind::Connect) {
                    BleError::Gatt {
                        kind: OperationKind::Connect,
                        status: GattStatus::from_code(status),
                    }
                } else {
                    BleError::LinkLost(device.clone())
                };
                self.teardown(device, reason);
            }
        }
    }

    fn on_services_discovered(&mut self, device: &DeviceId, status: u8, services: Vec<GattService>) {
        match self.state.registry.link(device).map(|link| link.state) {
            None => {
                debug!("Ignoring services from untracked {}", device);
                return;
            }
            Some(LinkState::ServiceDiscovering) => {}
            Some(state) => {
                warn!("Ignoring services from {} while {:?}", device, state);
                return;
            }
        }
        if !GattStatus::from_code(status).is_success() {
            error!("Service discovery on {} failed with status {:#04X}", device, status);
            self.teardown(
                device,
                BleError::Gatt {
                    kind: OperationKind::Connect,
                    status: GattStatus::from_code(status),
                },
            );
            return;
        }

        log_gatt_table(device, &services);
        let services = self
            .state
            .registry
            .store_services(device, services)
            .services
            .clone();
        info!("{} is ready with {} services", device, services.len());

        if self.config.request_max_mtu_on_connect {
            self.state
                .scheduler
                .enqueue(Operation::mtu_request(device.clone(), self.config.clamped_mtu()));
        }
        self.emit(ListenerEvent::ConnectionSetupComplete {
            device: device.clone(),
            services,
        });

        if self.pending_on(device) == Some(OperationKind::Connect) {
            self.signal_completion();
        } else {
            self.drive();
        }
    }

    fn on_characteristic_read(&mut self, device: &DeviceId, characteristic: Uuid, value: Vec<u8>, status: u8) {
        match GattStatus::from_code(status) {
            GattStatus::Success => {
                info!("Read {} from {}: {}", characteristic, device, to_hex_string(&value));
                self.emit(ListenerEvent::CharacteristicRead {
                    device: device.clone(),
                    characteristic,
                    value,
                });
            }
            GattStatus::ReadNotPermitted => {
                error!("Read not permitted for {} on {}", characteristic, device);
                self.fail_pending(device, OperationKind::CharacteristicRead, GattStatus::ReadNotPermitted);
            }
            other => {
                error!(
                    "Characteristic read of {} on {} failed with status {:#04X}",
                    characteristic, device, status
                );
                self.fail_pending(device, OperationKind::CharacteristicRead, other);
            }
        }
        self.complete_if(device, OperationKind::CharacteristicRead);
    }

    fn on_characteristic_write(&mut self, device: &DeviceId, characteristic: Uuid, value: Vec<u8>, status: u8) {
        match GattStatus::from_code(status) {
            GattStatus::Success => {
                info!("Wrote {} to {}: {}", to_hex_string(&value), characteristic, device);
                self.emit(ListenerEvent::CharacteristicWrite {
                    device: device.clone(),
                    characteristic,
                    value,
                });
            }
            GattStatus::WriteNotPermitted => {
                error!("Write not permitted for {} on {}", characteristic, device);
                self.fail_pending(device, OperationKind::CharacteristicWrite, GattStatus::WriteNotPermitted);
            }
            other => {
                error!(
                    "Characteristic write of {} on {} failed with status {:#04X}",
                    characteristic, device, status
                );
                self.fail_pending(device, OperationKind::CharacteristicWrite, other);
            }
        }
        self.complete_if(device, OperationKind::CharacteristicWrite);
    }

    fn on_descriptor_read(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: u8,
    ) {
        match GattStatus::from_code(status) {
            GattStatus::Success => {
                info!("Read descriptor {} from {}: {}", descriptor, device, to_hex_string(&value));
                self.emit(ListenerEvent::DescriptorRead {
                    device: device.clone(),
                    characteristic,
                    descriptor,
                    value,
                });
            }
            other => {
                error!(
                    "Descriptor read of {} on {} failed with status {:#04X}",
                    descriptor, device, status
                );
                self.fail_pending(device, OperationKind::DescriptorRead, other);
            }
        }
        self.complete_if(device, OperationKind::DescriptorRead);
    }

    fn on_descriptor_write(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: u8,
    ) {
        let pending = self.pending_on(device);
        let gatt_status = GattStatus::from_code(status);

        if gatt_status.is_success() {
            if is_config_descriptor(descriptor) {
                self.on_config_descriptor_written(device, characteristic, &value, pending);
            } else {
                info!("Wrote descriptor {} on {}: {}", descriptor, device, to_hex_string(&value));
                self.emit(ListenerEvent::DescriptorWrite {
                    device: device.clone(),
                    characteristic,
                    descriptor,
                    value,
                });
            }
        } else {
            error!(
                "Descriptor write of {} on {} failed with status {:#04X}",
                descriptor, device, status
            );
            match pending {
                Some(OperationKind::EnableNotifications) => {
                    self.set_notifying(device, characteristic, false);
                }
                Some(OperationKind::DisableNotifications) => {
                    self.set_notifying(device, characteristic, true);
                }
                _ => {}
            }
            if let Some(kind) = pending.filter(|k| k.completes_on_descriptor_write()) {
                self.fail(device, kind, BleError::Gatt { kind, status: gatt_status });
            }
        }

        match pending {
            Some(kind) if kind.completes_on_descriptor_write() => self.signal_completion(),
            _ => debug!("Unsolicited descriptor write completion from {}", device),
        }
    }

    fn on_config_descriptor_written(
        &mut self,
        device: &DeviceId,
        characteristic: Uuid,
        value: &[u8],
        pending: Option<OperationKind>,
    ) {
        let decoded = ConfigDescriptorValue::decode(value);
        let intended = match pending {
            Some(OperationKind::EnableNotifications) => Some(true),
            Some(OperationKind::DisableNotifications) => Some(false),
            _ => None,
        };
        if let Some(enable) = intended
            && decoded != ConfigDescriptorValue::Unrecognized
            && decoded.is_enable() != enable
        {
            warn!(
                "Configuration write on {} for {} does not match the requested state",
                device, characteristic
            );
        }

        match decoded {
            ConfigDescriptorValue::EnableNotification | ConfigDescriptorValue::EnableIndication => {
                info!("Updates enabled for {} on {}", characteristic, device);
                self.emit(ListenerEvent::NotificationsEnabled {
                    device: device.clone(),
                    characteristic,
                });
            }
            ConfigDescriptorValue::Disable => {
                info!("Updates disabled for {} on {}", characteristic, device);
                self.emit(ListenerEvent::NotificationsDisabled {
                    device: device.clone(),
                    characteristic,
                });
            }
            ConfigDescriptorValue::Unrecognized => {
                error!(
                    "Unexpected configuration value {} written for {} on {}",
                    to_hex_string(value),
                    characteristic,
                    device
                );
            }
        }
    }

    fn on_mtu_changed(&mut self, device: &DeviceId, mtu: u16, status: u8) {
        if GattStatus::from_code(status).is_success() {
            info!("MTU on {} is now {}", device, mtu);
            if let Some(session) = self.state.registry.link_mut(device) {
                session.mtu = mtu;
            }
            self.emit(ListenerEvent::MtuChanged {
                device: device.clone(),
                mtu,
            });
        } else {
            error!("MTU request on {} failed with status {:#04X}", device, status);
            self.fail_pending(device, OperationKind::MtuRequest, GattStatus::from_code(status));
        }
        self.complete_if(device, OperationKind::MtuRequest);
    }

    /// Reports a status failure for the in-flight operation if it is `kind`.
    fn fail_pending(&mut self, device: &DeviceId, kind: OperationKind, status: GattStatus) {
        if self.pending_on(device) == Some(kind) {
            self.fail(device, kind, BleError::Gatt { kind, status });
        }
    }
}
