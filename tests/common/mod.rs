//! Shared fixtures: a radio that only records what it was asked to do and a
//! listener that records what it was told.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use meeting_signal_central::config::EngineConfig;
use meeting_signal_central::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_CLIENT_CHARACTERISTIC_CONFIG,
    UUID_MEETING_SERVICE, UUID_MEETING_STATUS,
};
use meeting_signal_central::core::bluetooth::{
    CharacteristicProperties, ConnectionEventListener, ConnectionManager, DescriptorPermissions,
    DeviceId, GattCharacteristic, GattDescriptor, GattEvent, GattRadio, GattService,
    ListenerEvent, OperationKind, ProfileState, RadioError, WriteType,
};
use meeting_signal_central::error::BleError;
use uuid::Uuid;

/// Write-without-response only, no descriptors
pub const UUID_STREAM: Uuid = Uuid::from_u128(0x00002a3d_0000_1000_8000_00805f9b34fb);

/// Indicate only, with a configuration descriptor
pub const UUID_ALERTS: Uuid = Uuid::from_u128(0x00002a46_0000_1000_8000_00805f9b34fb);

/// A plain readable descriptor (Characteristic User Description)
pub const UUID_USER_DESCRIPTION: Uuid = Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(DeviceId),
    DiscoverServices(DeviceId),
    Disconnect(DeviceId),
    Close(DeviceId),
    ReadCharacteristic(DeviceId, Uuid),
    WriteCharacteristic(DeviceId, Uuid, WriteType, Vec<u8>),
    ReadDescriptor(DeviceId, Uuid, Uuid),
    WriteDescriptor(DeviceId, Uuid, Uuid, Vec<u8>),
    SetNotification(DeviceId, Uuid, bool),
    RequestMtu(DeviceId, u16),
}

impl Call {
    fn name(&self) -> &'static str {
        match self {
            Call::Connect(_) => "connect",
            Call::DiscoverServices(_) => "discover_services",
            Call::Disconnect(_) => "disconnect",
            Call::Close(_) => "close",
            Call::ReadCharacteristic(..) => "read_characteristic",
            Call::WriteCharacteristic(..) => "write_characteristic",
            Call::ReadDescriptor(..) => "read_descriptor",
            Call::WriteDescriptor(..) => "write_descriptor",
            Call::SetNotification(..) => "set_notification",
            Call::RequestMtu(..) => "request_mtu",
        }
    }
}

/// Accepts every request and never answers; tests play the completions.
#[derive(Default)]
pub struct FakeRadio {
    calls: Mutex<Vec<Call>>,
    refused: Mutex<HashSet<&'static str>>,
}

impl FakeRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later call named `name` fail synchronously.
    pub fn refuse(&self, name: &'static str) {
        self.refused.lock().unwrap().insert(name);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: Call) -> Result<(), RadioError> {
        let name = call.name();
        self.calls.lock().unwrap().push(call);
        if self.refused.lock().unwrap().contains(name) {
            return Err(RadioError::new(format!("{} refused", name)));
        }
        Ok(())
    }
}

impl GattRadio for FakeRadio {
    fn connect(&self, device: &DeviceId) -> Result<(), RadioError> {
        self.record(Call::Connect(device.clone()))
    }

    fn discover_services(&self, device: &DeviceId) -> Result<(), RadioError> {
        self.record(Call::DiscoverServices(device.clone()))
    }

    fn disconnect(&self, device: &DeviceId) -> Result<(), RadioError> {
        self.record(Call::Disconnect(device.clone()))
    }

    fn close(&self, device: &DeviceId) {
        let _ = self.record(Call::Close(device.clone()));
    }

    fn read_characteristic(&self, device: &DeviceId, characteristic: Uuid) -> Result<(), RadioError> {
        self.record(Call::ReadCharacteristic(device.clone(), characteristic))
    }

    fn write_characteristic(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        write_type: WriteType,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        self.record(Call::WriteCharacteristic(
            device.clone(),
            characteristic,
            write_type,
            payload.to_vec(),
        ))
    }

    fn read_descriptor(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<(), RadioError> {
        self.record(Call::ReadDescriptor(device.clone(), characteristic, descriptor))
    }

    fn write_descriptor(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        self.record(Call::WriteDescriptor(
            device.clone(),
            characteristic,
            descriptor,
            payload.to_vec(),
        ))
    }

    fn set_notification(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), RadioError> {
        self.record(Call::SetNotification(device.clone(), characteristic, enable))
    }

    fn request_mtu(&self, device: &DeviceId, mtu: u16) -> Result<(), RadioError> {
        self.record(Call::RequestMtu(device.clone(), mtu))
    }
}

/// Remembers every event it is handed, in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<(OperationKind, BleError)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ListenerEvent::OperationFailed { kind, error, .. } => Some((kind, error)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ConnectionEventListener for RecordingListener {
    fn on_connection_setup_complete(&self, device: &DeviceId, services: &[GattService]) {
        self.push(ListenerEvent::ConnectionSetupComplete {
            device: device.clone(),
            services: services.to_vec(),
        });
    }

    fn on_disconnect(&self, device: &DeviceId) {
        self.push(ListenerEvent::Disconnect {
            device: device.clone(),
        });
    }

    fn on_characteristic_read(&self, device: &DeviceId, characteristic: Uuid, value: &[u8]) {
        self.push(ListenerEvent::CharacteristicRead {
            device: device.clone(),
            characteristic,
            value: value.to_vec(),
        });
    }

    fn on_characteristic_write(&self, device: &DeviceId, characteristic: Uuid, value: &[u8]) {
        self.push(ListenerEvent::CharacteristicWrite {
            device: device.clone(),
            characteristic,
            value: value.to_vec(),
        });
    }

    fn on_characteristic_changed(&self, device: &DeviceId, characteristic: Uuid, value: &[u8]) {
        self.push(ListenerEvent::CharacteristicChanged {
            device: device.clone(),
            characteristic,
            value: value.to_vec(),
        });
    }

    fn on_descriptor_read(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) {
        self.push(ListenerEvent::DescriptorRead {
            device: device.clone(),
            characteristic,
            descriptor,
            value: value.to_vec(),
        });
    }

    fn on_descriptor_write(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) {
        self.push(ListenerEvent::DescriptorWrite {
            device: device.clone(),
            characteristic,
            descriptor,
            value: value.to_vec(),
        });
    }

    fn on_notifications_enabled(&self, device: &DeviceId, characteristic: Uuid) {
        self.push(ListenerEvent::NotificationsEnabled {
            device: device.clone(),
            characteristic,
        });
    }

    fn on_notifications_disabled(&self, device: &DeviceId, characteristic: Uuid) {
        self.push(ListenerEvent::NotificationsDisabled {
            device: device.clone(),
            characteristic,
        });
    }

    fn on_mtu_changed(&self, device: &DeviceId, mtu: u16) {
        self.push(ListenerEvent::MtuChanged {
            device: device.clone(),
            mtu,
        });
    }

    fn on_operation_failed(&self, device: &DeviceId, kind: OperationKind, error: &BleError) {
        self.push(ListenerEvent::OperationFailed {
            device: device.clone(),
            kind,
            error: error.clone(),
        });
    }
}

pub fn device_a() -> DeviceId {
    DeviceId::from("AA:AA:AA:AA:AA:01")
}

pub fn device_b() -> DeviceId {
    DeviceId::from("BB:BB:BB:BB:BB:02")
}

/// The GATT table of a meeting signal peripheral, plus two oddball characteristics.
pub fn meeting_services() -> Vec<GattService> {
    let config_descriptor = GattDescriptor::new(
        UUID_CLIENT_CHARACTERISTIC_CONFIG,
        DescriptorPermissions::READ | DescriptorPermissions::WRITE,
    );
    vec![
        GattService::new(UUID_BATTERY_SERVICE).with_characteristic(
            GattCharacteristic::new(
                UUID_BATTERY_LEVEL,
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
            )
            .with_descriptor(config_descriptor.clone())
            .with_descriptor(GattDescriptor::new(
                UUID_USER_DESCRIPTION,
                DescriptorPermissions::READ,
            )),
        ),
        GattService::new(UUID_MEETING_SERVICE)
            .with_characteristic(GattCharacteristic::new(
                UUID_MEETING_STATUS,
                CharacteristicProperties::READ | CharacteristicProperties::WRITE,
            ))
            .with_characteristic(GattCharacteristic::new(
                UUID_STREAM,
                CharacteristicProperties::WRITE_NO_RESPONSE,
            ))
            .with_characteristic(
                GattCharacteristic::new(UUID_ALERTS, CharacteristicProperties::INDICATE)
                    .with_descriptor(config_descriptor),
            ),
    ]
}

/// Defaults minus the automatic MTU request, which most scenarios do not care about.
pub fn quiet_config() -> EngineConfig {
    EngineConfig {
        request_max_mtu_on_connect: false,
        ..EngineConfig::default()
    }
}

pub fn engine(config: EngineConfig) -> (ConnectionManager, Arc<FakeRadio>, Arc<RecordingListener>) {
    let radio = FakeRadio::new();
    let manager = ConnectionManager::new(radio.clone(), config);
    let listener = RecordingListener::new();
    assert!(manager.register_listener(&listener));
    (manager, radio, listener)
}

pub fn connected(device: &DeviceId) -> GattEvent {
    GattEvent::ConnectionStateChanged {
        device: device.clone(),
        status: 0,
        new_state: ProfileState::Connected,
    }
}

pub fn disconnected(device: &DeviceId, status: u8) -> GattEvent {
    GattEvent::ConnectionStateChanged {
        device: device.clone(),
        status,
        new_state: ProfileState::Disconnected,
    }
}

pub fn discovered(device: &DeviceId) -> GattEvent {
    GattEvent::ServicesDiscovered {
        device: device.clone(),
        status: 0,
        services: meeting_services(),
    }
}

/// Plays a full connect handshake and clears the radio's call log.
pub fn bring_up(manager: &ConnectionManager, radio: &FakeRadio, device: &DeviceId) {
    manager.connect(device).unwrap();
    manager.handle_event(connected(device));
    manager.handle_event(discovered(device));
    assert!(manager.is_connected(device));
    radio.take_calls();
}
