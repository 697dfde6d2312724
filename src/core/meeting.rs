//! Client for the meeting signal peripheral
//! Thin layer over the engine that knows the peripheral's characteristics
//! and payload format.

use log::{info, warn};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    MEETING_OFF, MEETING_ON, UUID_BATTERY_LEVEL, UUID_MEETING_STATUS,
};
use crate::core::bluetooth::{ConnectionManager, DeviceId, find_characteristic};
use crate::error::BleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingStatus {
    On,
    Off,
}

impl MeetingStatus {
    pub fn payload(self) -> &'static [u8] {
        match self {
            Self::On => MEETING_ON,
            Self::Off => MEETING_OFF,
        }
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            p if p == MEETING_ON => Some(Self::On),
            p if p == MEETING_OFF => Some(Self::Off),
            _ => None,
        }
    }
}

/// Battery percentage reported by the standard battery level characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryLevel(pub u8);

impl BatteryLevel {
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [level] if *level <= 100 => Some(Self(*level)),
            _ => None,
        }
    }
}

/// Requests for one meeting signal peripheral. Results arrive through the
/// manager's listeners.
#[derive(Clone)]
pub struct MeetingSignalClient {
    manager: ConnectionManager,
    device: DeviceId,
}

impl MeetingSignalClient {
    pub fn new(manager: ConnectionManager, device: DeviceId) -> Self {
        Self { manager, device }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Whether the peripheral exposes `characteristic`. Logs when it does not.
    fn has_characteristic(&self, characteristic: Uuid) -> Result<bool, BleError> {
        let Some(services) = self.manager.services_on_device(&self.device) else {
            warn!("{} is not connected", self.device);
            return Err(BleError::NotConnected(self.device.clone()));
        };
        let found = find_characteristic(&services, characteristic).is_some();
        if !found {
            warn!("{} does not expose {}, skipping", self.device, characteristic);
        }
        Ok(found)
    }

    pub fn write_meeting_status(&self, status: MeetingStatus) -> Result<(), BleError> {
        if !self.has_characteristic(UUID_MEETING_STATUS)? {
            return Ok(());
        }
        info!("Setting meeting status of {} to {:?}", self.device, status);
        self.manager
            .write_characteristic(&self.device, UUID_MEETING_STATUS, status.payload())
    }

    pub fn read_meeting_status(&self) -> Result<(), BleError> {
        if !self.has_characteristic(UUID_MEETING_STATUS)? {
            return Ok(());
        }
        self.manager.read_characteristic(&self.device, UUID_MEETING_STATUS)
    }

    pub fn subscribe_battery_level(&self) -> Result<(), BleError> {
        if !self.has_characteristic(UUID_BATTERY_LEVEL)? {
            return Ok(());
        }
        self.manager.enable_notifications(&self.device, UUID_BATTERY_LEVEL)
    }

    pub fn unsubscribe_battery_level(&self) -> Result<(), BleError> {
        if !self.has_characteristic(UUID_BATTERY_LEVEL)? {
            return Ok(());
        }
        self.manager.disable_notifications(&self.device, UUID_BATTERY_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_payloads() {
        assert_eq!(MeetingStatus::On.payload(), b"m");
        assert_eq!(MeetingStatus::Off.payload(), b"x");
        assert_eq!(MeetingStatus::from_payload(b"m"), Some(MeetingStatus::On));
        assert_eq!(MeetingStatus::from_payload(b"x"), Some(MeetingStatus::Off));
        assert_eq!(MeetingStatus::from_payload(b"mx"), None);
    }

    #[test]
    fn battery_level_is_one_percent_byte() {
        assert_eq!(BatteryLevel::from_payload(&[87]), Some(BatteryLevel(87)));
        assert_eq!(BatteryLevel::from_payload(&[101]), None);
        assert_eq!(BatteryLevel::from_payload(&[]), None);
        assert_eq!(BatteryLevel::from_payload(&[50, 0]), None);
    }
}
