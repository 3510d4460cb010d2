use std::time::Instant;
use futures::channel::mpsc::{Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::session::types::{
    AccSample, DeviceDescriptor, EegSample, PpgSample, SensorKind, SensorSample, SensorSet,
    SessionCommand, SessionEvent,
};

/// Base tick of the simulated device, milliseconds.
pub const TICK_MS: u64 = 50;

/// Ticks between a scan start and the first scan results.
const SCAN_DISCOVERY_TICKS: u32 = 4;

/// Ticks between a connect command and the connected event.
const CONNECT_TICKS: u32 = 6;

/// Ticks between a sensor start command and collection becoming active.
const ACTIVATE_TICKS: u32 = 8;

/// Ticks between battery level updates.
const BATTERY_TICKS: u32 = 100;

struct SimState {
    started_at: Instant,
    tick: u32,
    scanning: bool,
    scan_results_at: Option<u32>,
    connecting: Option<(u32, DeviceDescriptor)>,
    connected: Option<DeviceDescriptor>,
    selected: SensorSet,
    activation_at: Option<u32>,
    started: SensorSet,
    collection_active: bool,
    recording: bool,
    auto_reconnect: bool,
    battery: u8,
}

impl SimState {
    fn new() -> SimState {
        SimState {
            started_at: Instant::now(),
            tick: 0,
            scanning: false,
            scan_results_at: None,
            connecting: None,
            connected: None,
            selected: SensorSet::new(),
            activation_at: None,
            started: SensorSet::new(),
            collection_active: false,
            recording: false,
            auto_reconnect: false,
            battery: 100,
        }
    }

    fn timestamp_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn sample_for(&self, kind: SensorKind) -> SensorSample {
        let t = self.timestamp_ms();
        let phase = t as f32 / 1000.0;

        match kind {
            SensorKind::Eeg => SensorSample::Eeg(EegSample {
                timestamp_ms: t,
                channel1_uv: (phase * 10.0).sin() * 40.0,
                channel2_uv: (phase * 8.0).cos() * 35.0,
                lead_off: false,
            }),
            SensorKind::Ppg => SensorSample::Ppg(PpgSample {
                timestamp_ms: t,
                red: 52_000 + ((phase * 1.2).sin() * 800.0) as i32,
                ir: 61_000 + ((phase * 1.2).cos() * 900.0) as i32,
            }),
            SensorKind::Acc => SensorSample::Acc(AccSample {
                timestamp_ms: t,
                x: ((phase * 2.0).sin() * 64.0) as i16,
                y: ((phase * 2.0).cos() * 64.0) as i16,
                z: 1024,
            }),
        }
    }
}

async fn emit(events: &mut Sender<SessionEvent>, event: SessionEvent) {
    if let Err(err) = events.send(event).await {
        warn!("Failed to push event from simulated device: {:?}", err);
    }
}

async fn handle_command(state: &mut SimState, events: &mut Sender<SessionEvent>, command: SessionCommand) {
    match command {
        SessionCommand::StartScan => {
            state.scanning = true;
            state.scan_results_at = Some(state.tick + SCAN_DISCOVERY_TICKS);
            emit(events, SessionEvent::Scanning(true)).await;
        },
        SessionCommand::StopScan => {
            state.scanning = false;
            state.scan_results_at = None;
            emit(events, SessionEvent::Scanning(false)).await;
        },
        SessionCommand::Connect(address) => {
            let device = DeviceDescriptor {
                name: Some(format!("LinkBand-{}", &address[address.len().saturating_sub(4)..])),
                address,
            };
            state.connecting = Some((state.tick + CONNECT_TICKS, device));
        },
        SessionCommand::Disconnect => {
            state.connecting = None;
            state.connected = None;
            if state.collection_active {
                state.collection_active = false;
                state.started = SensorSet::new();
                emit(events, SessionEvent::CollectionActive(false)).await;
            }
            if state.recording {
                state.recording = false;
                emit(events, SessionEvent::Recording(false)).await;
            }
            emit(events, SessionEvent::Connected(false)).await;
            emit(events, SessionEvent::ConnectedDeviceName(None)).await;
        },
        SessionCommand::EnableAutoReconnect => {
            state.auto_reconnect = true;
            emit(events, SessionEvent::AutoReconnectEnabled(true)).await;
        },
        SessionCommand::DisableAutoReconnect => {
            state.auto_reconnect = false;
            emit(events, SessionEvent::AutoReconnectEnabled(false)).await;
        },
        SessionCommand::SelectSensor(kind) => {
            if state.selected.insert(kind) {
                emit(events, SessionEvent::SelectedSensors(state.selected.clone())).await;
            }
        },
        SessionCommand::DeselectSensor(kind) => {
            if state.selected.shift_remove(&kind) {
                emit(events, SessionEvent::SelectedSensors(state.selected.clone())).await;
            }
        },
        SessionCommand::StartSelectedSensors => {
            if !state.selected.is_empty() && state.connected.is_some() {
                state.activation_at = Some(state.tick + ACTIVATE_TICKS);
            }
        },
        SessionCommand::StopSelectedSensors => {
            state.activation_at = None;
            if state.collection_active {
                state.collection_active = false;
                state.started = SensorSet::new();
                emit(events, SessionEvent::CollectionActive(false)).await;
            }
            if state.recording {
                state.recording = false;
                emit(events, SessionEvent::Recording(false)).await;
            }
        },
        SessionCommand::StartRecording => {
            if state.collection_active && !state.recording {
                state.recording = true;
                emit(events, SessionEvent::Recording(true)).await;
            }
        },
        SessionCommand::StopRecording => {
            if state.recording {
                state.recording = false;
                emit(events, SessionEvent::Recording(false)).await;
            }
        },
    }
}

async fn handle_tick(state: &mut SimState, events: &mut Sender<SessionEvent>) {
    state.tick += 1;

    if state.scanning && state.scan_results_at.is_some_and(|at| state.tick >= at) {
        state.scan_results_at = None;
        emit(events, SessionEvent::ScanResults(vec![
            DeviceDescriptor {
                name: Some("LinkBand-4F2A".to_string()),
                address: "00:1A:7D:DA:4F:2A".to_string(),
            },
            DeviceDescriptor {
                name: None,
                address: "58:94:B2:00:91:C7".to_string(),
            },
        ])).await;
    }

    if let Some((at, device)) = state.connecting.clone() {
        if state.tick >= at {
            state.connecting = None;
            state.connected = Some(device.clone());
            state.scanning = false;
            emit(events, SessionEvent::Scanning(false)).await;
            emit(events, SessionEvent::Connected(true)).await;
            emit(events, SessionEvent::ConnectedDeviceName(device.name)).await;
            emit(events, SessionEvent::BatteryLevel(Some(state.battery))).await;
        }
    }

    if state.connected.is_some() && state.activation_at.is_some_and(|at| state.tick >= at) {
        state.activation_at = None;
        state.collection_active = true;
        state.started = state.selected.clone();
        emit(events, SessionEvent::CollectionActive(true)).await;
    }

    if state.collection_active {
        let started = state.started.clone();
        for kind in started {
            let sample = state.sample_for(kind);
            emit(events, SessionEvent::Sample(sample)).await;
        }
    }

    if state.connected.is_some() && state.tick % BATTERY_TICKS == 0 {
        state.battery = state.battery.saturating_sub(1);
        emit(events, SessionEvent::BatteryLevel(Some(state.battery))).await;
    }
}

/// A stand-in for the vendor BLE session service. Speaks the same command and
/// event contract, so the application runs without hardware; a vendor-backed
/// implementation plugs into the same two channels.
pub fn device_sim(
    cancel: CancellationToken,
    mut events: Sender<SessionEvent>,
    mut commands: Receiver<SessionCommand>,
) -> JoinHandle<()> {
    spawn(async move {
        let mut state = SimState::new();
        let mut ticker = interval(Duration::from_millis(TICK_MS));

        info!("Simulated LinkBand device started");

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(command) = commands.next() => {
                    handle_command(&mut state, &mut events, command).await;
                },
                _ = ticker.tick() => {
                    handle_tick(&mut state, &mut events).await;
                },
            }
        }

        info!("Simulated LinkBand device stopped");
    })
}
