use iced::Event;

use crate::config::types::Config;
use crate::error::CommandRejected;
use crate::session::types::SensorKind;

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    ConfigLoadComplete((Config, Option<String>)),
    ApplyDirtyConfig,
    ConfigSaveComplete(Option<String>),
    NoticeConfirmed,

    /// The session store changed; the payload is the store revision.
    SessionChanged(u64),
    /// Repeats every 500ms while some sensor is pending activation.
    PendingTick,

    StartScanPressed,
    StopScanPressed,
    ConnectPressed(String),
    DisconnectPressed,
    AutoReconnectToggled(bool),
    SensorToggled(SensorKind, bool),
    StartSensorsPressed,
    StopSensorsPressed,
    StartRecordingPressed,
    StopRecordingPressed,

    /// A fire-and-forget session command finished being issued.
    CommandIssued(()),
    /// A gated session command was accepted or rejected.
    CommandOutcome(Result<(), CommandRejected>),
}
