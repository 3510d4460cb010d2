use tokio::sync::watch;

use crate::session::types::{
    AccSample, ActiveScreen, ConnectionState, DeviceDescriptor, EegSample, PpgSample, SensorKind,
    SensorSample, SensorSet,
};

/// How many samples per sensor the store retains. The UI only renders the most
/// recent few rows; history belongs to the external service (CSV recording).
pub const SAMPLE_TAIL: usize = 16;

/// A single observable value: synchronous reads of the latest value plus
/// subscriptions that see the current value immediately and every change
/// afterwards. A slow subscriber only ever observes the newest value, never a
/// backlog (single-slot mailbox).
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(initial: T) -> Observable<T> {
        let (tx, _) = watch::channel(initial);
        Observable { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Publish a new value. Setting a value equal to the current one notifies
    /// nobody.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Modify the value in place as one atomic read-modify-write; concurrent
    /// callers are serialized by the watch channel. The closure reports
    /// whether it changed anything; an unchanged value notifies nobody.
    pub fn update<F>(&self, modify: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.tx.send_if_modified(modify)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Single source of truth for everything the UI renders: the projection of the
/// device session service's observable state plus the coordinator's derived
/// flags. All fields are whole-value swaps; a reader never sees a partially
/// updated field.
#[derive(Debug)]
pub struct SessionStateStore {
    pub connected: Observable<bool>,
    pub connected_device_name: Observable<Option<String>>,
    pub scanning: Observable<bool>,
    pub scanned_devices: Observable<Vec<DeviceDescriptor>>,
    pub collection_active: Observable<bool>,
    pub selected_sensors: Observable<SensorSet>,
    pub battery_level: Observable<Option<u8>>,
    pub recording: Observable<bool>,
    pub auto_reconnect_enabled: Observable<bool>,

    /// Sensors the running collection session actually started with. Written
    /// only by the coordinator on a collection-active transition.
    pub started_sensors: Observable<SensorSet>,
    /// True between a start request and the observed activation (or stop).
    pub activation_requested: Observable<bool>,

    pub active_screen: Observable<ActiveScreen>,

    pub recent_eeg: Observable<Vec<EegSample>>,
    pub recent_ppg: Observable<Vec<PpgSample>>,
    pub recent_acc: Observable<Vec<AccSample>>,

    // bumped once per logical mutation, so the GUI can wake on any change
    revision: watch::Sender<u64>,
}

impl SessionStateStore {
    pub fn new() -> SessionStateStore {
        let (revision, _) = watch::channel(0);

        SessionStateStore {
            connected: Observable::new(false),
            connected_device_name: Observable::new(None),
            scanning: Observable::new(false),
            scanned_devices: Observable::new(Vec::new()),
            collection_active: Observable::new(false),
            selected_sensors: Observable::new(SensorSet::new()),
            battery_level: Observable::new(None),
            recording: Observable::new(false),
            auto_reconnect_enabled: Observable::new(false),
            started_sensors: Observable::new(SensorSet::new()),
            activation_requested: Observable::new(false),
            active_screen: Observable::new(ActiveScreen::Scanner),
            recent_eeg: Observable::new(Vec::new()),
            recent_ppg: Observable::new(Vec::new()),
            recent_acc: Observable::new(Vec::new()),
            revision,
        }
    }

    pub fn bump_revision(&self) {
        self.revision.send_modify(|value| *value += 1);
    }

    pub fn subscribe_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Derived connection status; Connected takes priority over Scanning.
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::derive(self.connected.get(), self.scanning.get())
    }

    /// True while a sensor is selected for the session but the running
    /// collection does not cover it yet: either activation is still in flight,
    /// or the selection changed mid-session and only takes effect on the next
    /// start.
    pub fn is_pending_activation(&self, kind: SensorKind) -> bool {
        (self.activation_requested.get() || self.collection_active.get())
            && self.selected_sensors.get().contains(&kind)
            && !self.started_sensors.get().contains(&kind)
    }

    /// Recording may only be requested while connected with an active
    /// collection.
    pub fn can_record(&self) -> bool {
        self.connected.get() && self.collection_active.get()
    }

    pub fn connection_status_text(&self) -> String {
        match (self.connection_state(), self.connected_device_name.get()) {
            (ConnectionState::Connected, Some(name)) => format!("{} Connected", name),
            (state, _) => state.to_string(),
        }
    }

    pub fn data_status_text(&self) -> &'static str {
        if self.collection_active.get() {
            "Receiving data"
        } else if !self.selected_sensors.get().is_empty() {
            "Sensors selected"
        } else {
            "Idle"
        }
    }

    pub fn recording_status_text(&self) -> &'static str {
        if self.recording.get() {
            "Recording"
        } else {
            "Not recording"
        }
    }

    /// Append a sample to the per-sensor tail, keeping only the latest
    /// SAMPLE_TAIL entries.
    pub fn push_sample(&self, sample: SensorSample) {
        fn push<T: Clone + PartialEq>(target: &Observable<Vec<T>>, sample: T) {
            let mut tail = target.get();
            tail.push(sample);
            if tail.len() > SAMPLE_TAIL {
                let excess = tail.len() - SAMPLE_TAIL;
                tail.drain(..excess);
            }
            target.set(tail);
        }

        match sample {
            SensorSample::Eeg(sample) => push(&self.recent_eeg, sample),
            SensorSample::Ppg(sample) => push(&self.recent_ppg, sample),
            SensorSample::Acc(sample) => push(&self.recent_acc, sample),
        }
    }

    /// Tear everything down to session-start defaults.
    pub fn reset(&self) {
        self.connected.set(false);
        self.connected_device_name.set(None);
        self.scanning.set(false);
        self.scanned_devices.set(Vec::new());
        self.collection_active.set(false);
        self.selected_sensors.set(SensorSet::new());
        self.battery_level.set(None);
        self.recording.set(false);
        self.started_sensors.set(SensorSet::new());
        self.activation_requested.set(false);
        self.active_screen.set(ActiveScreen::Scanner);
        self.recent_eeg.set(Vec::new());
        self.recent_ppg.set(Vec::new());
        self.recent_acc.set(Vec::new());
        self.bump_revision();
    }
}

impl Default for SessionStateStore {
    fn default() -> Self {
        SessionStateStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observable_get_returns_latest_value() {
        let value = Observable::new(1);
        assert_eq!(value.get(), 1);

        value.set(2);
        assert_eq!(value.get(), 2);
    }

    #[test]
    fn observable_set_deduplicates() {
        let value = Observable::new(5);
        let rx = value.subscribe();

        assert!(!value.set(5), "setting the current value must not notify");
        assert!(!rx.has_changed().unwrap());

        assert!(value.set(6));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn observable_update_mutates_in_place() {
        let value = Observable::new(vec![1]);
        let rx = value.subscribe();

        assert!(value.update(|v| {
            v.push(2);
            true
        }));
        assert_eq!(value.get(), vec![1, 2]);
        assert!(rx.has_changed().unwrap());

        let rx = value.subscribe();
        assert!(!value.update(|_| false), "a declined update must not notify");
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn observable_subscriber_sees_current_value_immediately() {
        let value = Observable::new("hello".to_string());
        let rx = value.subscribe();
        assert_eq!(*rx.borrow(), "hello");
    }

    #[tokio::test]
    async fn observable_slow_subscriber_coalesces_to_latest() {
        let value = Observable::new(0);
        let mut rx = value.subscribe();

        value.set(1);
        value.set(2);
        value.set(3);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn pending_activation_requires_selection() {
        let store = SessionStateStore::new();
        store.activation_requested.set(true);
        store.collection_active.set(true);

        // not selected, so never pending, regardless of other flags
        assert!(!store.is_pending_activation(SensorKind::Eeg));

        let mut selected = SensorSet::new();
        selected.insert(SensorKind::Eeg);
        store.selected_sensors.set(selected);
        assert!(store.is_pending_activation(SensorKind::Eeg));
    }

    #[test]
    fn can_record_requires_connection_and_active_collection() {
        let store = SessionStateStore::new();
        assert!(!store.can_record());

        store.collection_active.set(true);
        assert!(!store.can_record(), "collection alone is not enough");

        store.connected.set(true);
        assert!(store.can_record());
    }

    #[test]
    fn status_texts_follow_state() {
        let store = SessionStateStore::new();
        assert_eq!(store.connection_status_text(), "Disconnected");
        assert_eq!(store.data_status_text(), "Idle");
        assert_eq!(store.recording_status_text(), "Not recording");

        store.scanning.set(true);
        assert_eq!(store.connection_status_text(), "Scanning…");

        store.connected.set(true);
        store.connected_device_name.set(Some("LinkBand-1234".to_string()));
        assert_eq!(store.connection_status_text(), "LinkBand-1234 Connected");

        let mut selected = SensorSet::new();
        selected.insert(SensorKind::Ppg);
        store.selected_sensors.set(selected);
        assert_eq!(store.data_status_text(), "Sensors selected");

        store.collection_active.set(true);
        assert_eq!(store.data_status_text(), "Receiving data");

        store.recording.set(true);
        assert_eq!(store.recording_status_text(), "Recording");
    }

    #[test]
    fn sample_tail_is_bounded() {
        let store = SessionStateStore::new();

        for n in 0..(SAMPLE_TAIL as u64 + 10) {
            store.push_sample(SensorSample::Acc(AccSample {
                timestamp_ms: n,
                x: 0,
                y: 0,
                z: 0,
            }));
        }

        let tail = store.recent_acc.get();
        assert_eq!(tail.len(), SAMPLE_TAIL);
        assert_eq!(tail.last().unwrap().timestamp_ms, SAMPLE_TAIL as u64 + 9);
    }

    #[test]
    fn reset_restores_defaults() {
        let store = SessionStateStore::new();
        store.connected.set(true);
        store.recording.set(true);
        store.active_screen.set(ActiveScreen::DataView);
        store.push_sample(SensorSample::Eeg(EegSample {
            timestamp_ms: 1,
            channel1_uv: 1.0,
            channel2_uv: 2.0,
            lead_off: false,
        }));

        store.reset();

        assert!(!store.connected.get());
        assert!(!store.recording.get());
        assert_eq!(store.active_screen.get(), ActiveScreen::Scanner);
        assert!(store.recent_eeg.get().is_empty());
    }
}
