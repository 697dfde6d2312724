//! Constants used throughout the engine
//! This module contains the well-known GATT UUIDs, the MTU bounds and
//! the fixed payloads the engine writes on its own.

use uuid::Uuid;

/// Name prefix advertised by the meeting signal peripheral
pub const MEETING_SIGNAL_NAME: &str = "MyESP32";

/// Standard Bluetooth Service UUIDs
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// The meeting signal service exposed by the peripheral firmware
pub const UUID_MEETING_SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// The characteristic carrying the meeting on/off state
pub const UUID_MEETING_STATUS: Uuid = Uuid::from_u128(0x00002ae2_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration Descriptor (0x2902)
pub const UUID_CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Smallest ATT MTU every link supports
pub const GATT_MIN_MTU_SIZE: u16 = 23;

/// Largest ATT MTU a central may request
pub const GATT_MAX_MTU_SIZE: u16 = 517;

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling indications
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// CCCD value disabling both notifications and indications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Payload switching the meeting signal on
pub const MEETING_ON: &[u8] = b"m";

/// Payload switching the meeting signal off
pub const MEETING_OFF: &[u8] = b"x";

/// Native status codes reported by the radio stack
pub const GATT_SUCCESS: u8 = 0x00;
pub const GATT_READ_NOT_PERMITTED: u8 = 0x02;
pub const GATT_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const GATT_ERROR: u8 = 0x85;
