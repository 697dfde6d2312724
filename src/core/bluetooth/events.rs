//! Raw completion events reported by the radio
//! and their normalization into the engine's status classes.

use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DISABLE_NOTIFICATION_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
    GATT_READ_NOT_PERMITTED, GATT_SUCCESS, GATT_WRITE_NOT_PERMITTED,
};
use crate::core::bluetooth::types::{DeviceId, GattService};

/// Profile-level link state carried by connection state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A completion event, exactly as the radio reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    ConnectionStateChanged {
        device: DeviceId,
        status: u8,
        new_state: ProfileState,
    },
    ServicesDiscovered {
        device: DeviceId,
        status: u8,
        services: Vec<GattService>,
    },
    CharacteristicRead {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
        status: u8,
    },
    CharacteristicWrite {
        device: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
        status: u8,
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
        status: u8,
    },
    DescriptorWrite {
        device: DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: u8,
    },
    MtuChanged {
        device: DeviceId,
        mtu: u16,
        status: u8,
    },
}

impl GattEvent {
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::ConnectionStateChanged { device, .. }
            | Self::ServicesDiscovered { device, .. }
            | Self::CharacteristicRead { device, .. }
            | Self::CharacteristicWrite { device, .. }
            | Self::CharacteristicChanged { device, .. }
            | Self::DescriptorRead { device, .. }
            | Self::DescriptorWrite { device, .. }
            | Self::MtuChanged { device, .. } => device,
        }
    }
}

/// Four-way status classification; unknown native codes are `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    Other,
}

impl GattStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            GATT_SUCCESS => Self::Success,
            GATT_READ_NOT_PERMITTED => Self::ReadNotPermitted,
            GATT_WRITE_NOT_PERMITTED => Self::WriteNotPermitted,
            _ => Self::Other,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Normalized connection state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected,
    Disconnected,
    /// Anything else: a non-success status or an intermediate state.
    Abnormal(u8),
}

impl ConnectionChange {
    pub fn classify(status: u8, new_state: ProfileState) -> Self {
        match (status, new_state) {
            (GATT_SUCCESS, ProfileState::Connected) => Self::Connected,
            (GATT_SUCCESS, ProfileState::Disconnected) => Self::Disconnected,
            (status, _) => Self::Abnormal(status),
        }
    }
}

/// Decoded value written to a Client Characteristic Configuration Descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDescriptorValue {
    EnableNotification,
    EnableIndication,
    Disable,
    Unrecognized,
}

impl ConfigDescriptorValue {
    pub fn decode(value: &[u8]) -> Self {
        if value == ENABLE_NOTIFICATION_VALUE {
            Self::EnableNotification
        } else if value == ENABLE_INDICATION_VALUE {
            Self::EnableIndication
        } else if value == DISABLE_NOTIFICATION_VALUE {
            Self::Disable
        } else {
            Self::Unrecognized
        }
    }

    pub fn is_enable(self) -> bool {
        matches!(self, Self::EnableNotification | Self::EnableIndication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::GATT_ERROR;

    #[test]
    fn status_codes_reduce_to_four_classes() {
        assert_eq!(GattStatus::from_code(0x00), GattStatus::Success);
        assert_eq!(GattStatus::from_code(0x02), GattStatus::ReadNotPermitted);
        assert_eq!(GattStatus::from_code(0x03), GattStatus::WriteNotPermitted);
        assert_eq!(GattStatus::from_code(GATT_ERROR), GattStatus::Other);
        assert_eq!(GattStatus::from_code(0x0e), GattStatus::Other);
    }

    #[test]
    fn connection_change_requires_success_status() {
        assert_eq!(
            ConnectionChange::classify(0, ProfileState::Connected),
            ConnectionChange::Connected
        );
        assert_eq!(
            ConnectionChange::classify(0, ProfileState::Disconnected),
            ConnectionChange::Disconnected
        );
        assert_eq!(
            ConnectionChange::classify(8, ProfileState::Disconnected),
            ConnectionChange::Abnormal(8)
        );
        assert_eq!(
            ConnectionChange::classify(0, ProfileState::Connecting),
            ConnectionChange::Abnormal(0)
        );
    }

    #[test]
    fn decodes_config_descriptor_values() {
        assert_eq!(
            ConfigDescriptorValue::decode(&[0x01, 0x00]),
            ConfigDescriptorValue::EnableNotification
        );
        assert_eq!(
            ConfigDescriptorValue::decode(&[0x02, 0x00]),
            ConfigDescriptorValue::EnableIndication
        );
        assert_eq!(
            ConfigDescriptorValue::decode(&[0x00, 0x00]),
            ConfigDescriptorValue::Disable
        );
        assert_eq!(
            ConfigDescriptorValue::decode(b"m"),
            ConfigDescriptorValue::Unrecognized
        );
        assert!(ConfigDescriptorValue::EnableIndication.is_enable());
    }
}
