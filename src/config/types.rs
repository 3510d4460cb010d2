use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Ask the device session service to reconnect on its own after a drop.
    pub auto_reconnect: bool,

    /// Whether an unsolicited connection drop (not a user-initiated
    /// disconnect) navigates back to the scanner screen. Off by default:
    /// with auto-reconnect the session may silently resume, and the data view
    /// should survive that.
    pub return_to_scanner_on_drop: bool,

    /// How many of the retained samples the data screen renders per sensor.
    pub recent_sample_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auto_reconnect: false,
            return_to_scanner_on_drop: false,
            recent_sample_rows: 3,
        }
    }
}
