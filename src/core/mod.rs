//! Core functionality of the Meeting Signal central
//! The generic BLE engine plus the client for the meeting-status peripheral.

pub mod bluetooth;
pub mod meeting;

// Re-export commonly used types
pub use bluetooth::{ConnectionManager, DeviceId};
pub use meeting::{BatteryLevel, MeetingSignalClient, MeetingStatus};
