use enum_iterator::{all, Sequence};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// The three sensors a LinkBand-class device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Sequence, Serialize, Deserialize)]
pub enum SensorKind {
    Eeg,
    Ppg,
    Acc,
}

impl SensorKind {
    pub fn all() -> Vec<SensorKind> {
        all::<SensorKind>().collect::<Vec<_>>()
    }

    /// Nominal sample rate of the sensor stream, as advertised by the device.
    pub fn sampling_rate_hz(&self) -> u16 {
        match self {
            SensorKind::Eeg => 250,
            SensorKind::Ppg => 50,
            SensorKind::Acc => 25,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            SensorKind::Eeg => "EEG",
            SensorKind::Ppg => "PPG",
            SensorKind::Acc => "ACC",
        };

        write!(f, "{}", result)
    }
}

/// Set of sensors, in user selection order.
pub type SensorSet = IndexSet<SensorKind>;

/// Connection status as shown to the user. Connected wins over Scanning when
/// the device keeps scanning in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connected,
}

impl ConnectionState {
    pub fn derive(connected: bool, scanning: bool) -> ConnectionState {
        if connected {
            ConnectionState::Connected
        } else if scanning {
            ConnectionState::Scanning
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Scanning => "Scanning…",
            ConnectionState::Connected => "Connected",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveScreen {
    Scanner,
    DataView,
}

/// A device as it appears in the scan results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: Option<String>,
    pub address: String,
}

impl DeviceDescriptor {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown device")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EegSample {
    pub timestamp_ms: u64,
    pub channel1_uv: f32,
    pub channel2_uv: f32,
    pub lead_off: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpgSample {
    pub timestamp_ms: u64,
    pub red: i32,
    pub ir: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccSample {
    pub timestamp_ms: u64,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl std::fmt::Display for EegSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timestamp: {}, ch1: {}µV, ch2: {}µV, leadOff: {}",
            self.timestamp_ms,
            self.channel1_uv.round(),
            self.channel2_uv.round(),
            if self.lead_off { "1" } else { "0" },
        )
    }
}

impl std::fmt::Display for PpgSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timestamp: {}, red: {}, ir: {}", self.timestamp_ms, self.red, self.ir)
    }
}

impl std::fmt::Display for AccSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timestamp: {}, x: {}, y: {}, z: {}", self.timestamp_ms, self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSample {
    Eeg(EegSample),
    Ppg(PpgSample),
    Acc(AccSample),
}

impl SensorSample {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorSample::Eeg(_) => SensorKind::Eeg,
            SensorSample::Ppg(_) => SensorKind::Ppg,
            SensorSample::Acc(_) => SensorKind::Acc,
        }
    }
}

/// State changes pushed by the device session service. Latest-value semantics:
/// every variant replaces the previous value of its field wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected(bool),
    ConnectedDeviceName(Option<String>),
    Scanning(bool),
    ScanResults(Vec<DeviceDescriptor>),
    CollectionActive(bool),
    SelectedSensors(SensorSet),
    BatteryLevel(Option<u8>),
    Recording(bool),
    AutoReconnectEnabled(bool),
    Sample(SensorSample),
}

/// Commands accepted by the device session service. Fire-and-forget; the
/// service reports completion through SessionEvents, never a return value.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect,
    EnableAutoReconnect,
    DisableAutoReconnect,
    SelectSensor(SensorKind),
    DeselectSensor(SensorKind),
    StartSelectedSensors,
    StopSelectedSensors,
    StartRecording,
    StopRecording,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_kind_all_lists_every_sensor_once() {
        let kinds = SensorKind::all();
        assert_eq!(kinds, vec![SensorKind::Eeg, SensorKind::Ppg, SensorKind::Acc]);
    }

    #[test]
    fn connection_state_prefers_connected_over_scanning() {
        assert_eq!(ConnectionState::derive(true, true), ConnectionState::Connected);
        assert_eq!(ConnectionState::derive(true, false), ConnectionState::Connected);
        assert_eq!(ConnectionState::derive(false, true), ConnectionState::Scanning);
        assert_eq!(ConnectionState::derive(false, false), ConnectionState::Disconnected);
    }

    #[test]
    fn device_descriptor_display_name_falls_back() {
        let named = DeviceDescriptor {
            name: Some("LinkBand-1234".to_string()),
            address: "00:11:22:33:44:55".to_string(),
        };
        let unnamed = DeviceDescriptor {
            name: None,
            address: "00:11:22:33:44:66".to_string(),
        };

        assert_eq!(named.display_name(), "LinkBand-1234");
        assert_eq!(unnamed.display_name(), "Unknown device");
    }

    #[test]
    fn sample_kind_matches_variant() {
        let sample = SensorSample::Ppg(PpgSample { timestamp_ms: 1, red: 2, ir: 3 });
        assert_eq!(sample.kind(), SensorKind::Ppg);
    }
}
