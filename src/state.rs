//! Application state management
//! Owns the engine and the task that feeds it radio events.

use std::sync::Arc;

use log::info;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::bluetooth::{ConnectionManager, GattEvent, GattRadio};

pub struct AppState {
    pub manager: ConnectionManager,
    cancel_token: CancellationToken,
    event_pump: Option<JoinHandle<()>>,
}

impl AppState {
    /// Builds the engine over `radio` and starts pumping `events` into it.
    /// Must be called from within a tokio runtime.
    pub fn start(
        radio: Arc<dyn GattRadio>,
        events: UnboundedReceiver<GattEvent>,
        config: EngineConfig,
    ) -> Self {
        info!("Initializing connection manager...");
        let manager = ConnectionManager::new(radio, config);
        let cancel_token = CancellationToken::new();
        let event_pump = manager.spawn_event_pump(events, cancel_token.child_token());
        Self {
            manager,
            cancel_token,
            event_pump: Some(event_pump),
        }
    }

    /// Stops the event pump and waits for it to exit.
    pub async fn shutdown(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.event_pump.take() {
            if let Err(e) = handle.await {
                log::error!("Event pump ended abnormally: {}", e);
            }
        }
        info!("Application state shut down");
    }
}
