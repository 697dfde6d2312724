use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use bluest::Adapter;
use log::{error, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use meeting_signal_central::config::{CONFIG_FILE_NAME, EngineConfig};
use meeting_signal_central::core::bluetooth::constants::MEETING_SIGNAL_NAME;
use meeting_signal_central::core::bluetooth::{
    BluestRadio, ConnectionEventListener, DeviceId, GattService, OperationKind, event_channel,
};
use meeting_signal_central::core::{MeetingSignalClient, MeetingStatus};
use meeting_signal_central::error::BleError;
use meeting_signal_central::logging;
use meeting_signal_central::state::AppState;

const STEP_TIMEOUT: Duration = Duration::from_secs(20);

const USAGE: &str = "usage: meeting-signal <on|off|status> [device name or MAC]";

#[derive(Debug)]
enum Step {
    Ready,
    Written,
    Read(Vec<u8>),
    Disconnected,
    Failed(String),
}

/// Forwards the engine callbacks this tool waits on.
struct StepListener {
    steps: mpsc::UnboundedSender<Step>,
}

impl StepListener {
    fn send(&self, step: Step) {
        let _ = self.steps.send(step);
    }
}

impl ConnectionEventListener for StepListener {
    fn on_connection_setup_complete(&self, _device: &DeviceId, _services: &[GattService]) {
        self.send(Step::Ready);
    }

    fn on_disconnect(&self, _device: &DeviceId) {
        self.send(Step::Disconnected);
    }

    fn on_characteristic_read(&self, _device: &DeviceId, _characteristic: Uuid, value: &[u8]) {
        self.send(Step::Read(value.to_vec()));
    }

    fn on_characteristic_write(&self, _device: &DeviceId, _characteristic: Uuid, _value: &[u8]) {
        self.send(Step::Written);
    }

    fn on_operation_failed(&self, _device: &DeviceId, kind: OperationKind, error: &BleError) {
        // The follow-up MTU request is best effort
        if kind != OperationKind::MtuRequest {
            self.send(Step::Failed(error.to_string()));
        }
    }
}

async fn next_step(steps: &mut mpsc::UnboundedReceiver<Step>) -> Result<Step> {
    match tokio::time::timeout(STEP_TIMEOUT, steps.recv()).await {
        Ok(Some(Step::Failed(reason))) => bail!("operation failed: {}", reason),
        Ok(Some(step)) => Ok(step),
        Ok(None) => bail!("engine stopped"),
        Err(_) => bail!("no answer from the device within {:?}", STEP_TIMEOUT),
    }
}

/// Picks an already-paired device by name or MAC, defaulting to the meeting signal name.
async fn find_device(adapter: &Adapter, target: Option<&str>) -> Result<bluest::Device> {
    let wanted = target.unwrap_or(MEETING_SIGNAL_NAME);
    for device in adapter.connected_devices().await? {
        let name = device.name().unwrap_or_default();
        let id = DeviceId::new(device.id().to_string());
        let mac_matches = id
            .mac_address()
            .is_some_and(|mac| mac.eq_ignore_ascii_case(wanted));
        if name.starts_with(wanted) || mac_matches || id.as_str() == wanted {
            info!("Using {} ({})", name, id);
            return Ok(device);
        }
    }
    Err(anyhow!("no known device matches {:?}", wanted))
}

async fn run(command: &str, target: Option<&str>) -> Result<()> {
    let config = EngineConfig::load(CONFIG_FILE_NAME).await?;
    logging::init(config.log_level_filter()?)?;

    let adapter = Adapter::default()
        .await
        .ok_or_else(|| anyhow!("no Bluetooth adapter found"))?;
    adapter
        .wait_available()
        .await
        .context("Bluetooth adapter unavailable")?;

    let (sink, events) = event_channel();
    let radio = Arc::new(BluestRadio::new(adapter.clone(), sink));
    let device = radio.track(find_device(&adapter, target).await?);

    let mut state = AppState::start(radio.clone(), events, config);
    let (steps_tx, mut steps) = mpsc::unbounded_channel();
    let listener = Arc::new(StepListener { steps: steps_tx });
    state.manager.register_listener(&listener);

    state.manager.connect(&device)?;
    let outcome = async {
        match next_step(&mut steps).await? {
            Step::Ready => {}
            other => bail!("unexpected {:?} while connecting", other),
        }

        let client = MeetingSignalClient::new(state.manager.clone(), device.clone());
        match command {
            "on" | "off" => {
                let status = if command == "on" {
                    MeetingStatus::On
                } else {
                    MeetingStatus::Off
                };
                client.write_meeting_status(status)?;
                while !matches!(next_step(&mut steps).await?, Step::Written) {}
                println!("meeting signal {}", command);
            }
            _ => {
                client.read_meeting_status()?;
                loop {
                    if let Step::Read(value) = next_step(&mut steps).await? {
                        match MeetingStatus::from_payload(&value) {
                            Some(status) => println!("meeting signal {:?}", status),
                            None => println!("unrecognized status {:?}", value),
                        }
                        break;
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    if state.manager.disconnect(&device).is_ok() {
        while !matches!(next_step(&mut steps).await, Ok(Step::Disconnected) | Err(_)) {}
    }
    state.shutdown().await;
    radio.forget(&device);
    outcome
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.first().map(String::as_str) {
        Some(c @ ("on" | "off" | "status")) => c.to_string(),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&command, args.get(1).map(String::as_str)).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
