//! Error types for the engine
//! Precondition failures are returned synchronously to the caller; hardware
//! failures travel to listeners through `on_operation_failed`.

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::{DeviceId, GattStatus, OperationKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("already connected to {0}")]
    AlreadyConnected(DeviceId),

    #[error("a connection to {0} is already in progress")]
    ConnectionInProgress(DeviceId),

    #[error("not connected to {0}")]
    NotConnected(DeviceId),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound { characteristic: Uuid, descriptor: Uuid },

    #[error("{attribute} does not support {capability}")]
    MissingCapability {
        attribute: Uuid,
        capability: &'static str,
    },

    #[error("radio rejected {kind}: {reason}")]
    Radio { kind: OperationKind, reason: String },

    #[error("{kind} finished with status {status:?}")]
    Gatt { kind: OperationKind, status: GattStatus },

    #[error("link to {0} dropped while the operation was in flight")]
    LinkLost(DeviceId),

    #[error("{0} timed out waiting for its completion event")]
    Timeout(OperationKind),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown log level: {0}")]
    LogLevel(String),
}
