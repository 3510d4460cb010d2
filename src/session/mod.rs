pub mod coordinator;
pub mod router;
pub mod store;
pub mod types;

use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::error::CommandRejected;
use crate::session::coordinator::SensorActivationCoordinator;
use crate::session::router::ScreenRouter;
use crate::session::store::SessionStateStore;
use crate::session::types::{SensorKind, SessionCommand, SessionEvent};

/// One monitoring session against a device session service.
///
/// Owns the store, the activation coordinator and the screen router. Events
/// pushed by the service (possibly from a BLE callback context) are marshaled
/// onto a single ingest loop (`run`); commands go the other way as
/// fire-and-forget channel sends. `dispose` tears the ingest loop down.
pub struct Session {
    store: Arc<SessionStateStore>,
    coordinator: SensorActivationCoordinator,
    router: Mutex<ScreenRouter>,
    commands: Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(commands: Sender<SessionCommand>, config: &Config, cancel: CancellationToken) -> Session {
        let store = Arc::new(SessionStateStore::new());
        let coordinator = SensorActivationCoordinator::new(store.clone(), commands.clone());
        let router = Mutex::new(ScreenRouter::new(store.clone(), config.return_to_scanner_on_drop));

        Session {
            store,
            coordinator,
            router,
            commands,
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    /// Ingest loop: applies every service event to the store until disposed.
    /// Must be driven by exactly one task.
    pub async fn run(&self, mut events: Receiver<SessionEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Session disposed, stopping ingest loop");
                    break;
                },
                event = events.next() => match event {
                    Some(event) => self.apply_event(event),
                    None => {
                        warn!("Device session service closed its event channel");
                        break;
                    },
                },
            }
        }
    }

    fn apply_event(&self, event: SessionEvent) {
        let changed = match event {
            SessionEvent::Connected(connected) => {
                let changed = self.store.connected.set(connected);
                if changed {
                    self.router
                        .lock()
                        .expect("Failed to lock screen router")
                        .on_connected_changed(connected);
                }
                changed
            },
            SessionEvent::ConnectedDeviceName(name) => self.store.connected_device_name.set(name),
            SessionEvent::Scanning(scanning) => self.store.scanning.set(scanning),
            SessionEvent::ScanResults(devices) => self.store.scanned_devices.set(devices),
            SessionEvent::CollectionActive(active) => {
                if self.store.collection_active.get() != active {
                    // single reconciliation point for the snapshot and the
                    // activation-request flag
                    self.coordinator.on_collection_active_changed(active);
                }
                // revision already bumped by the coordinator
                return;
            },
            SessionEvent::SelectedSensors(selection) => self.store.selected_sensors.set(selection),
            SessionEvent::BatteryLevel(level) => self.store.battery_level.set(level),
            SessionEvent::Recording(recording) => self.store.recording.set(recording),
            SessionEvent::AutoReconnectEnabled(enabled) => {
                self.store.auto_reconnect_enabled.set(enabled)
            },
            SessionEvent::Sample(sample) => {
                self.store.push_sample(sample);
                true
            },
        };

        if changed {
            self.store.bump_revision();
        }
    }

    async fn send(&self, command: SessionCommand) {
        let mut sender = self.commands.clone();
        if let Err(err) = sender.send(command).await {
            warn!("Failed to send command to device session service: {:?}", err);
        }
    }

    pub async fn start_scan(&self) {
        self.send(SessionCommand::StartScan).await;
    }

    pub async fn stop_scan(&self) {
        self.send(SessionCommand::StopScan).await;
    }

    pub async fn connect(&self, address: String) {
        self.send(SessionCommand::Connect(address)).await;
    }

    /// Explicit, user-initiated disconnect: issues the command and routes back
    /// to the scanner without waiting for completion.
    pub async fn disconnect(&self) {
        self.send(SessionCommand::Disconnect).await;
        self.router
            .lock()
            .expect("Failed to lock screen router")
            .on_disconnect_requested();
    }

    pub fn set_return_to_scanner_on_drop(&self, enabled: bool) {
        self.router
            .lock()
            .expect("Failed to lock screen router")
            .set_return_to_scanner_on_drop(enabled);
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) {
        let command = if enabled {
            SessionCommand::EnableAutoReconnect
        } else {
            SessionCommand::DisableAutoReconnect
        };
        self.send(command).await;
    }

    pub async fn select_sensor(&self, kind: SensorKind, selected: bool) {
        self.coordinator.on_selection_changed(kind, selected).await;
    }

    pub async fn start_selected_sensors(&self) -> Result<(), CommandRejected> {
        self.coordinator.on_start_requested().await
    }

    pub async fn stop_selected_sensors(&self) {
        self.coordinator.on_stop_requested().await;
    }

    /// Recording is gated here as well as in the UI: the command is not
    /// forwarded unless the device is connected with an active collection.
    pub async fn start_recording(&self) -> Result<(), CommandRejected> {
        if !self.store.can_record() {
            return Err(CommandRejected::NotRecordable);
        }

        self.send(SessionCommand::StartRecording).await;
        Ok(())
    }

    pub async fn stop_recording(&self) {
        self.send(SessionCommand::StopRecording).await;
    }

    /// Disconnect, stop scanning and drop all session state back to defaults.
    pub async fn reset(&self) {
        self.send(SessionCommand::Disconnect).await;
        self.send(SessionCommand::StopScan).await;
        self.store.reset();
    }

    /// Cancel the ingest loop. Safe to call more than once.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{ActiveScreen, DeviceDescriptor, PpgSample, SensorSample, SensorSet};
    use futures::channel::mpsc::channel;

    struct Harness {
        session: Arc<Session>,
        events: Sender<SessionEvent>,
        commands: Receiver<SessionCommand>,
    }

    fn harness(config: Config) -> Harness {
        let (command_tx, command_rx) = channel(64);
        let (event_tx, event_rx) = channel(64);
        let session = Arc::new(Session::new(command_tx, &config, CancellationToken::new()));

        let runner = session.clone();
        tokio::spawn(async move {
            runner.run(event_rx).await;
        });

        Harness {
            session,
            events: event_tx,
            commands: command_rx,
        }
    }

    async fn push(harness: &mut Harness, event: SessionEvent) {
        let mut revision = harness.session.store().subscribe_revision();
        harness.events.send(event).await.unwrap();
        revision.changed().await.unwrap();
    }

    #[tokio::test]
    async fn events_project_into_the_store() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        push(&mut harness, SessionEvent::Scanning(true)).await;
        assert!(store.scanning.get());

        let devices = vec![DeviceDescriptor {
            name: Some("LinkBand-1234".to_string()),
            address: "00:11:22:33:44:55".to_string(),
        }];
        push(&mut harness, SessionEvent::ScanResults(devices.clone())).await;
        assert_eq!(store.scanned_devices.get(), devices);

        push(&mut harness, SessionEvent::BatteryLevel(Some(87))).await;
        assert_eq!(store.battery_level.get(), Some(87));
    }

    #[tokio::test]
    async fn connect_event_routes_to_data_view() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        push(&mut harness, SessionEvent::Connected(true)).await;
        assert_eq!(store.active_screen.get(), ActiveScreen::DataView);

        // silent drop keeps the data view with the default config
        push(&mut harness, SessionEvent::Connected(false)).await;
        assert_eq!(store.active_screen.get(), ActiveScreen::DataView);
    }

    #[tokio::test]
    async fn explicit_disconnect_routes_to_scanner() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        push(&mut harness, SessionEvent::Connected(true)).await;
        harness.session.disconnect().await;

        assert_eq!(store.active_screen.get(), ActiveScreen::Scanner);
        assert_eq!(harness.commands.next().await, Some(SessionCommand::Disconnect));
    }

    #[tokio::test]
    async fn recording_is_rejected_until_connected_and_collecting() {
        let mut harness = harness(Config::default());

        // collection active without connection is not enough
        push(&mut harness, SessionEvent::CollectionActive(true)).await;
        let result = harness.session.start_recording().await;
        assert!(matches!(result, Err(CommandRejected::NotRecordable)));
        assert!(harness.commands.try_next().is_err(), "command must not be forwarded");

        push(&mut harness, SessionEvent::Connected(true)).await;
        harness.session.start_recording().await.unwrap();
        assert_eq!(harness.commands.next().await, Some(SessionCommand::StartRecording));
    }

    #[tokio::test]
    async fn collection_active_event_drives_the_coordinator() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        harness.session.select_sensor(SensorKind::Eeg, true).await;
        harness.session.start_selected_sensors().await.unwrap();
        assert!(store.activation_requested.get());

        push(&mut harness, SessionEvent::CollectionActive(true)).await;

        assert!(!store.activation_requested.get());
        assert!(store.started_sensors.get().contains(&SensorKind::Eeg));
    }

    #[tokio::test]
    async fn externally_driven_selection_overwrites_wholesale() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        harness.session.select_sensor(SensorKind::Eeg, true).await;

        let mut external = SensorSet::new();
        external.insert(SensorKind::Acc);
        push(&mut harness, SessionEvent::SelectedSensors(external.clone())).await;

        assert_eq!(store.selected_sensors.get(), external);
    }

    #[tokio::test]
    async fn samples_land_in_the_recent_tail() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        let sample = PpgSample { timestamp_ms: 42, red: 1000, ir: 2000 };
        push(&mut harness, SessionEvent::Sample(SensorSample::Ppg(sample))).await;

        assert_eq!(store.recent_ppg.get(), vec![sample]);
    }

    #[tokio::test]
    async fn reset_returns_the_store_to_defaults() {
        let mut harness = harness(Config::default());
        let store = harness.session.store().clone();

        push(&mut harness, SessionEvent::Connected(true)).await;
        push(&mut harness, SessionEvent::CollectionActive(true)).await;

        harness.session.reset().await;

        assert!(!store.connected.get());
        assert!(!store.collection_active.get());
        assert_eq!(store.active_screen.get(), ActiveScreen::Scanner);
        assert_eq!(harness.commands.next().await, Some(SessionCommand::Disconnect));
        assert_eq!(harness.commands.next().await, Some(SessionCommand::StopScan));
    }

    #[tokio::test]
    async fn dispose_stops_the_ingest_loop() {
        let (command_tx, _command_rx) = channel(64);
        let (mut event_tx, event_rx) = channel(64);
        let session = Arc::new(Session::new(
            command_tx,
            &Config::default(),
            CancellationToken::new(),
        ));

        let runner = session.clone();
        let handle = tokio::spawn(async move {
            runner.run(event_rx).await;
        });

        session.dispose();
        handle.await.unwrap();

        // events after disposal are ignored; the loop is gone
        let _ = event_tx.send(SessionEvent::Connected(true)).await;
        assert!(!session.store().connected.get());
    }
}
