//! Connection registry
//! Maps device identities to their sessions. The only place session state
//! lives; everything else resolves a device through here.

use std::collections::HashMap;

use log::debug;

use crate::core::bluetooth::types::{DeviceId, GattService, LinkState, Session};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<DeviceId, Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device counts as connected once its services are discovered.
    pub fn is_connected(&self, device: &DeviceId) -> bool {
        self.sessions.get(device).is_some_and(Session::is_ready)
    }

    /// The session of a connected device.
    pub fn session_for(&self, device: &DeviceId) -> Option<&Session> {
        self.sessions.get(device).filter(|s| s.is_ready())
    }

    /// Any tracked link, including ones still being set up or torn down.
    pub fn link(&self, device: &DeviceId) -> Option<&Session> {
        self.sessions.get(device)
    }

    pub fn link_mut(&mut self, device: &DeviceId) -> Option<&mut Session> {
        self.sessions.get_mut(device)
    }

    pub fn link_state(&self, device: &DeviceId) -> LinkState {
        self.sessions
            .get(device)
            .map_or(LinkState::Disconnected, |s| s.state)
    }

    pub fn services_on_device(&self, device: &DeviceId) -> Option<&[GattService]> {
        self.session_for(device).map(|s| s.services.as_slice())
    }

    /// Starts tracking a link with a fresh session shell, replacing any stale one.
    pub fn open(&mut self, device: DeviceId) -> &mut Session {
        debug!("Tracking new link to {}", device);
        let session = self
            .sessions
            .entry(device.clone())
            .or_insert_with(|| Session::connecting(device.clone()));
        *session = Session::connecting(device);
        session
    }

    /// Moves a link to `state`, creating the session if the radio reports a
    /// link the engine did not open itself.
    pub fn set_state(&mut self, device: &DeviceId, state: LinkState) -> &mut Session {
        let session = self
            .sessions
            .entry(device.clone())
            .or_insert_with(|| Session::connecting(device.clone()));
        debug!("{}: {:?} -> {:?}", device, session.state, state);
        session.state = state;
        session
    }

    /// Stores the discovered graph and marks the link ready.
    pub fn store_services(&mut self, device: &DeviceId, services: Vec<GattService>) -> &Session {
        let session = self.set_state(device, LinkState::Ready);
        session.services = services;
        session
    }

    pub fn remove(&mut self, device: &DeviceId) -> Option<Session> {
        self.sessions.remove(device)
    }

    /// Number of tracked links, ready or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ready_links_count_as_connected() {
        let mut registry = ConnectionRegistry::new();
        let device = DeviceId::from("AA:BB:CC:DD:EE:FF");

        registry.open(device.clone());
        assert!(!registry.is_connected(&device));
        assert!(registry.session_for(&device).is_none());
        assert_eq!(registry.link_state(&device), LinkState::Connecting);

        registry.store_services(&device, Vec::new());
        assert!(registry.is_connected(&device));
        assert!(registry.services_on_device(&device).is_some());
    }

    #[test]
    fn removing_a_session_disconnects() {
        let mut registry = ConnectionRegistry::new();
        let device = DeviceId::from("AA:BB:CC:DD:EE:FF");
        registry.store_services(&device, Vec::new());

        assert!(registry.remove(&device).is_some());
        assert!(!registry.is_connected(&device));
        assert_eq!(registry.link_state(&device), LinkState::Disconnected);
        assert!(registry.is_empty());
    }
}
