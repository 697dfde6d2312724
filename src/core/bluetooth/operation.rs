//! The closed set of operations the engine can execute
//! Every operation names its target device; the session is resolved at
//! dispatch time, never captured here.

use std::fmt;

use uuid::Uuid;

use crate::core::bluetooth::constants::{GATT_MAX_MTU_SIZE, GATT_MIN_MTU_SIZE};
use crate::core::bluetooth::types::DeviceId;

/// How a characteristic write is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// A queued GATT operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect {
        device: DeviceId,
    },
    Disconnect {
        device: DeviceId,
    },
    CharacteristicRead {
        device: DeviceId,
        characteristic: Uuid,
    },
    CharacteristicWrite {
        device: DeviceId,
        characteristic: Uuid,
        write_type: WriteType,
        payload: Vec<u8>,
    },
    DescriptorRead {
        device: DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    DescriptorWrite {
        device: DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        payload: Vec<u8>,
    },
    EnableNotifications {
        device: DeviceId,
        characteristic: Uuid,
    },
    DisableNotifications {
        device: DeviceId,
        characteristic: Uuid,
    },
    MtuRequest {
        device: DeviceId,
        mtu: u16,
    },
}

/// Payload-free tag of an [`Operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Disconnect,
    CharacteristicRead,
    CharacteristicWrite,
    DescriptorRead,
    DescriptorWrite,
    EnableNotifications,
    DisableNotifications,
    MtuRequest,
}

/// Clamps a requested ATT MTU to what the protocol allows.
pub fn clamp_mtu(requested: u16) -> u16 {
    requested.clamp(GATT_MIN_MTU_SIZE, GATT_MAX_MTU_SIZE)
}

impl Operation {
    /// An MTU request with the size already clamped.
    pub fn mtu_request(device: DeviceId, requested: u16) -> Self {
        Self::MtuRequest {
            device,
            mtu: clamp_mtu(requested),
        }
    }

    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Connect { device }
            | Self::Disconnect { device }
            | Self::CharacteristicRead { device, .. }
            | Self::CharacteristicWrite { device, .. }
            | Self::DescriptorRead { device, .. }
            | Self::DescriptorWrite { device, .. }
            | Self::EnableNotifications { device, .. }
            | Self::DisableNotifications { device, .. }
            | Self::MtuRequest { device, .. } => device,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Connect { .. } => OperationKind::Connect,
            Self::Disconnect { .. } => OperationKind::Disconnect,
            Self::CharacteristicRead { .. } => OperationKind::CharacteristicRead,
            Self::CharacteristicWrite { .. } => OperationKind::CharacteristicWrite,
            Self::DescriptorRead { .. } => OperationKind::DescriptorRead,
            Self::DescriptorWrite { .. } => OperationKind::DescriptorWrite,
            Self::EnableNotifications { .. } => OperationKind::EnableNotifications,
            Self::DisableNotifications { .. } => OperationKind::DisableNotifications,
            Self::MtuRequest { .. } => OperationKind::MtuRequest,
        }
    }

    pub fn targets(&self, device: &DeviceId) -> bool {
        self.device() == device
    }
}

impl OperationKind {
    /// Operations that finish on a descriptor-write completion.
    pub fn completes_on_descriptor_write(self) -> bool {
        matches!(
            self,
            Self::DescriptorWrite | Self::EnableNotifications | Self::DisableNotifications
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CharacteristicRead { device, characteristic }
            | Self::EnableNotifications { device, characteristic }
            | Self::DisableNotifications { device, characteristic } => {
                write!(f, "{} {} on {}", self.kind(), characteristic, device)
            }
            Self::CharacteristicWrite {
                device,
                characteristic,
                payload,
                ..
            } => write!(
                f,
                "{} {} ({} bytes) on {}",
                self.kind(),
                characteristic,
                payload.len(),
                device
            ),
            Self::DescriptorRead { device, descriptor, .. }
            | Self::DescriptorWrite { device, descriptor, .. } => {
                write!(f, "{} {} on {}", self.kind(), descriptor, device)
            }
            Self::MtuRequest { device, mtu } => write!(f, "{} {} on {}", self.kind(), mtu, device),
            Self::Connect { device } | Self::Disconnect { device } => {
                write!(f, "{} {}", self.kind(), device)
            }
        }
    }
}

/// Outcome of handing one operation to the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing to wait for, the pipeline may advance now.
    ImmediateCompletion,
    /// The radio owns the operation until its completion event arrives.
    AwaitingHardwareCallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_reports_its_device() {
        let device = DeviceId::from("AA:BB:CC:DD:EE:FF");
        let other = DeviceId::from("11:22:33:44:55:66");
        let op = Operation::DescriptorWrite {
            device: device.clone(),
            characteristic: Uuid::nil(),
            descriptor: Uuid::nil(),
            payload: vec![1, 0],
        };

        assert_eq!(op.device(), &device);
        assert!(op.targets(&device));
        assert!(!op.targets(&other));
        assert_eq!(op.kind(), OperationKind::DescriptorWrite);
    }

    #[test]
    fn descriptor_write_category() {
        assert!(OperationKind::EnableNotifications.completes_on_descriptor_write());
        assert!(OperationKind::DisableNotifications.completes_on_descriptor_write());
        assert!(OperationKind::DescriptorWrite.completes_on_descriptor_write());
        assert!(!OperationKind::CharacteristicWrite.completes_on_descriptor_write());
    }

    #[test]
    fn mtu_requests_are_clamped() {
        let device = DeviceId::from("AA:BB:CC:DD:EE:FF");

        assert_eq!(clamp_mtu(9999), 517);
        assert_eq!(clamp_mtu(0), 23);
        assert_eq!(clamp_mtu(185), 185);
        assert_eq!(
            Operation::mtu_request(device.clone(), 9999),
            Operation::MtuRequest { device, mtu: 517 }
        );
    }

    #[test]
    fn display_is_readable() {
        let op = Operation::MtuRequest {
            device: DeviceId::from("AA:BB:CC:DD:EE:FF"),
            mtu: 517,
        };
        assert_eq!(op.to_string(), "MtuRequest 517 on AA:BB:CC:DD:EE:FF");
    }
}
