//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::LazyLock;

use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::capability::{
    CapabilitySet, CharacteristicProperties, DescriptorPermissions,
};
use crate::core::bluetooth::constants::{GATT_MIN_MTU_SIZE, UUID_CLIENT_CHARACTERISTIC_CONFIG};

static MAC_ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("MAC address pattern is valid")
});

/// Opaque identity of a peripheral, usually its hardware address.
/// Platform ids are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the MAC address embedded in the id, upper-cased.
    /// Platform ids such as `bluetooth#BluetoothLE00:11:..-AA:BB:..` carry
    /// the peripheral address last.
    pub fn mac_address(&self) -> Option<String> {
        MAC_ADDRESS_PATTERN
            .find_iter(&self.0)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A descriptor attached to a discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattDescriptor {
    pub uuid: Uuid,
    pub permissions: DescriptorPermissions,
}

impl GattDescriptor {
    pub fn new(uuid: Uuid, permissions: DescriptorPermissions) -> Self {
        Self { uuid, permissions }
    }

    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_permissions(self.permissions)
    }

    /// True for the Client Characteristic Configuration Descriptor.
    pub fn is_config_descriptor(&self) -> bool {
        is_config_descriptor(self.uuid)
    }
}

pub fn is_config_descriptor(uuid: Uuid) -> bool {
    uuid == UUID_CLIENT_CHARACTERISTIC_CONFIG
}

/// A discovered characteristic and its descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<GattDescriptor>,
    /// Local notification flag, toggled before the CCCD is written.
    #[serde(default)]
    pub notifying: bool,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            descriptors: Vec::new(),
            notifying: false,
        }
    }

    pub fn with_descriptor(mut self, descriptor: GattDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_properties(self.properties)
    }

    pub fn descriptor(&self, uuid: Uuid) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }

    pub fn config_descriptor(&self) -> Option<&GattDescriptor> {
        self.descriptor(UUID_CLIENT_CHARACTERISTIC_CONFIG)
    }
}

/// A discovered primary service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: GattCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Finds the first characteristic with `uuid` across all services.
pub fn find_characteristic(services: &[GattService], uuid: Uuid) -> Option<&GattCharacteristic> {
    services.iter().find_map(|s| s.characteristic(uuid))
}

pub fn find_characteristic_mut(
    services: &mut [GattService],
    uuid: Uuid,
) -> Option<&mut GattCharacteristic> {
    services
        .iter_mut()
        .flat_map(|s| s.characteristics.iter_mut())
        .find(|c| c.uuid == uuid)
}

/// Finds `descriptor` under the characteristic `characteristic`.
pub fn find_descriptor(
    services: &[GattService],
    characteristic: Uuid,
    descriptor: Uuid,
) -> Option<&GattDescriptor> {
    find_characteristic(services, characteristic).and_then(|c| c.descriptor(descriptor))
}

/// Logs the discovered service table of a device.
pub fn log_gatt_table(device: &DeviceId, services: &[GattService]) {
    if services.is_empty() {
        info!("No service and characteristic available on {}, discover services first?", device);
        return;
    }
    for service in services {
        let mut table = String::new();
        for characteristic in &service.characteristics {
            table.push_str(&format!(
                "\n|--{}: {}",
                characteristic.uuid,
                characteristic.capabilities()
            ));
            for descriptor in &characteristic.descriptors {
                table.push_str(&format!(
                    "\n|------{}: {}",
                    descriptor.uuid,
                    descriptor.capabilities()
                ));
            }
        }
        info!("Service {} on {}\nCharacteristics:{}", service.uuid, device, table);
    }
}

/// Link lifecycle of one device, as driven by the completion adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    ServiceDiscovering,
    Ready,
    Failed,
}

/// An open connection to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub device: DeviceId,
    pub state: LinkState,
    pub services: Vec<GattService>,
    pub mtu: u16,
}

impl Session {
    /// A session shell for a connection that is still being opened.
    pub fn connecting(device: DeviceId) -> Self {
        Self {
            device,
            state: LinkState::Connecting,
            services: Vec::new(),
            mtu: GATT_MIN_MTU_SIZE,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        find_characteristic(&self.services, uuid)
    }

    pub fn characteristic_mut(&mut self, uuid: Uuid) -> Option<&mut GattCharacteristic> {
        find_characteristic_mut(&mut self.services, uuid)
    }

    pub fn descriptor(&self, characteristic: Uuid, descriptor: Uuid) -> Option<&GattDescriptor> {
        find_descriptor(&self.services, characteristic, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_mac_from_platform_id() {
        let id = DeviceId::from("BluetoothLE#BluetoothLE00:1a:7d:da:71:13-aa:bb:cc:dd:ee:ff");
        assert_eq!(id.mac_address().as_deref(), Some("AA:BB:CC:DD:EE:FF"));

        let opaque = DeviceId::from("5C1D6E2A-0000-4F1E-9E1B-000000000000");
        assert_eq!(opaque.mac_address(), None);
    }

    #[test]
    fn finds_descriptor_under_its_own_characteristic() {
        let first = Uuid::from_u128(0x1);
        let second = Uuid::from_u128(0x2);
        let services = vec![
            GattService::new(Uuid::from_u128(0x10))
                .with_characteristic(GattCharacteristic::new(
                    first,
                    CharacteristicProperties::READ,
                ))
                .with_characteristic(
                    GattCharacteristic::new(second, CharacteristicProperties::NOTIFY)
                        .with_descriptor(GattDescriptor::new(
                            UUID_CLIENT_CHARACTERISTIC_CONFIG,
                            DescriptorPermissions::READ | DescriptorPermissions::WRITE,
                        )),
                ),
        ];

        assert!(find_descriptor(&services, first, UUID_CLIENT_CHARACTERISTIC_CONFIG).is_none());
        let cccd = find_descriptor(&services, second, UUID_CLIENT_CHARACTERISTIC_CONFIG);
        assert!(cccd.is_some_and(|d| d.is_config_descriptor()));
    }

    #[test]
    fn new_session_starts_connecting_at_minimum_mtu() {
        let session = Session::connecting(DeviceId::from("AA:BB:CC:DD:EE:FF"));
        assert_eq!(session.state, LinkState::Connecting);
        assert_eq!(session.mtu, GATT_MIN_MTU_SIZE);
        assert!(!session.is_ready());
    }
}
