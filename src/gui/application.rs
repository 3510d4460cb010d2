use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::SinkExt;
use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::subscription;
use iced::time::{every as iced_time_every};
use iced::theme::Theme;
use iced::widget::{Column, button, checkbox, column, container, horizontal_rule, row, text};
use std::time::Duration;
use log::{error, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::error::AppRunError;
use crate::gui::types::Message;
use crate::session::Session;
use crate::session::types::{ActiveScreen, SensorKind, SessionEvent};
use crate::sim::device_sim::device_sim;

pub struct ApplicationFlags {
    config_io: ConfigIO,
}

/// Receivers handed to the session subscription the first time it starts.
/// The subscription is deduplicated by iced, so they are taken exactly once.
type PendingReceivers = (Receiver<SessionEvent>, Receiver<crate::session::types::SessionCommand>);

pub struct MonitorApplication {
    // this token is cancelled upon exit
    app_cancel: CancellationToken,

    // messages that the user must click away
    notices: Vec<String>,

    // current config, might not be saved to disk yet
    config_io: ConfigIO,
    config: Config,
    config_dirty: bool,
    // this flag is used to make sure that a user is not spammed with save configuration errors
    displayed_config_save_error: bool,

    session: Arc<Session>,
    receivers: Arc<Mutex<Option<PendingReceivers>>>,
    event_sender: Sender<SessionEvent>,

    // 1..=3, advanced by the pending tick
    dot_count: usize,
}

impl MonitorApplication {
    fn before_close(&mut self) {
        self.session.dispose();
        self.app_cancel.cancel();
    }

    fn load_config(&self) -> Command<Message> {
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.read().await {
                Ok(config) => (config, None),
                Err(err) => {
                    let mut error_message: Option<String> = None;

                    if err.is_file_not_found_error() {
                        // this is probably the first start of the app
                        info!("Config file not found, using defaults");
                    } else {
                        error!("Failed to load config: {:?}", &err);
                        error_message = Some(format!("Failed to load config: {}", &err));
                    }
                    (Config::default(), error_message)
                },
            }
        };

        Command::perform(fut, Message::ConfigLoadComplete)
    }

    fn save_config(&self) -> Command<Message> {
        let config = self.config.clone();
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.save(config).await {
                Ok(_) => None,
                Err(err) => {
                    error!("Failed to save config: {:?}", &err);
                    Some(format!("Failed to save config: {}", &err))
                },
            }
        };

        Command::perform(fut, Message::ConfigSaveComplete)
    }

    fn issue<F>(&self, command: F) -> Command<Message>
    where
        F: FnOnce(Arc<Session>) -> futures::future::BoxFuture<'static, ()>,
    {
        Command::perform(command(self.session.clone()), Message::CommandIssued)
    }

    fn any_pending_activation(&self) -> bool {
        let store = self.session.store();
        SensorKind::all().into_iter().any(|kind| store.is_pending_activation(kind))
    }

    fn pending_dots(&self) -> String {
        format!("receiving{}", ".".repeat(self.dot_count))
    }

    fn scanner_view(&self) -> Element<Message> {
        let store = self.session.store();
        let scanning = store.scanning.get();
        let connected = store.connected.get();

        let scan_button = button(text(if scanning { "Stop scan" } else { "Start scan" }))
            .on_press(if scanning { Message::StopScanPressed } else { Message::StartScanPressed });

        let auto_reconnect = checkbox("Reconnect automatically when the connection drops", store.auto_reconnect_enabled.get())
            .on_toggle(Message::AutoReconnectToggled);

        let devices = store.scanned_devices.get();
        let device_rows: Vec<Element<Message>> = devices
            .iter()
            .map(|device| {
                let action: Element<Message> = if connected {
                    button(text("Disconnect")).on_press(Message::DisconnectPressed).into()
                } else {
                    button(text("Connect"))
                        .on_press(Message::ConnectPressed(device.address.clone()))
                        .into()
                };

                row![
                    column![
                        text(device.display_name()).size(16),
                        text(&device.address).size(12),
                    ].width(Length::Fill),
                    action,
                ]
                .align_items(Alignment::Center)
                .spacing(20)
                .into()
            })
            .collect();

        let device_list: Element<Message> = if devices.is_empty() {
            text(if scanning { "Searching for devices…" } else { "No devices found." }).into()
        } else {
            Column::with_children(device_rows).spacing(10).into()
        };

        column![
            text("LinkBand scanner").size(24),
            auto_reconnect,
            scan_button,
            horizontal_rule(10),
            text(format!("Devices found ({})", devices.len())).size(18),
            device_list,
        ]
        .spacing(16)
        .into()
    }

    fn sensor_row(&self, kind: SensorKind) -> Element<Message> {
        let store = self.session.store();
        let selected = store.selected_sensors.get().contains(&kind);

        let mut cells = row![
            checkbox(kind.to_string(), selected)
                .on_toggle(move |checked| Message::SensorToggled(kind, checked)),
        ]
        .align_items(Alignment::Center)
        .spacing(6);

        if store.is_pending_activation(kind) {
            cells = cells.push(text(self.pending_dots()).size(12));
        }

        cells.into()
    }

    fn sample_lines(&self, kind: SensorKind) -> Vec<String> {
        let store = self.session.store();
        let rows = self.config.recent_sample_rows;

        fn tail<T: std::fmt::Display>(samples: &[T], rows: usize) -> Vec<String> {
            samples
                .iter()
                .rev()
                .take(rows)
                .rev()
                .map(|sample| sample.to_string())
                .collect()
        }

        match kind {
            SensorKind::Eeg => tail(&store.recent_eeg.get(), rows),
            SensorKind::Ppg => tail(&store.recent_ppg.get(), rows),
            SensorKind::Acc => tail(&store.recent_acc.get(), rows),
        }
    }

    fn data_view(&self) -> Element<Message> {
        let store = self.session.store();
        let collection_active = store.collection_active.get();
        let recording = store.recording.get();

        let mut status = column![
            text(store.connection_status_text()).size(16),
        ]
        .spacing(4);

        if store.connected.get() {
            let rates = SensorKind::all()
                .into_iter()
                .map(|kind| format!("{} {}Hz", kind, kind.sampling_rate_hz()))
                .collect::<Vec<_>>()
                .join(", ");
            status = status.push(text(format!("Sampling rates: {}", rates)).size(12));
        }

        if let Some(level) = store.battery_level.get() {
            status = status.push(text(format!("Battery: {}%", level)).size(12));
        }

        let sensor_rows = Column::with_children(
            SensorKind::all().into_iter().map(|kind| self.sensor_row(kind)),
        )
        .spacing(6);

        let mut toggle_sensors = button(text(if collection_active {
            "Stop sensors"
        } else {
            "Start sensors"
        }));
        if collection_active {
            toggle_sensors = toggle_sensors.on_press(Message::StopSensorsPressed);
        } else if !store.selected_sensors.get().is_empty() {
            toggle_sensors = toggle_sensors.on_press(Message::StartSensorsPressed);
        }

        let mut data_cards = column![].spacing(12);
        for kind in SensorKind::all() {
            if !store.started_sensors.get().contains(&kind) {
                continue;
            }

            let lines = self.sample_lines(kind);
            let mut card = column![text(format!("{} data", kind)).size(16)].spacing(2);
            if lines.is_empty() {
                card = card.push(text(format!("No {} data received yet", kind)).size(12));
            } else {
                for line in lines {
                    card = card.push(text(line).size(12));
                }
            }
            data_cards = data_cards.push(card);
        }

        let mut toggle_recording = button(text(if recording {
            "Stop recording"
        } else {
            "Start CSV recording"
        }));
        if recording {
            toggle_recording = toggle_recording.on_press(Message::StopRecordingPressed);
        } else if store.can_record() {
            toggle_recording = toggle_recording.on_press(Message::StartRecordingPressed);
        }

        column![
            text("LinkBand data").size(24),
            status,
            horizontal_rule(10),
            text("Sensors").size(18),
            sensor_rows,
            toggle_sensors,
            data_cards,
            horizontal_rule(10),
            row![
                toggle_recording,
                text(store.recording_status_text()).size(12),
            ].align_items(Alignment::Center).spacing(10),
            text(format!("Data status: {}", store.data_status_text())).size(12),
            button(text("Disconnect")).on_press(Message::DisconnectPressed),
        ]
        .spacing(16)
        .into()
    }
}

impl Application for MonitorApplication {
    type Executor = iced::executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (MonitorApplication, Command<Self::Message>) {
        let app_cancel = CancellationToken::new();

        let (command_tx, command_rx) = channel(64);
        let (event_tx, event_rx) = channel(256);
        let session = Arc::new(Session::new(command_tx, &Config::default(), app_cancel.child_token()));

        let app = MonitorApplication {
            app_cancel,
            notices: Vec::new(),
            config_io: flags.config_io,
            config: Config::default(),
            config_dirty: false,
            displayed_config_save_error: false,
            session,
            receivers: Arc::new(Mutex::new(Some((event_rx, command_rx)))),
            event_sender: event_tx,
            dot_count: 1,
        };

        let command = app.load_config();
        (app, command)
    }

    fn title(&self) -> String {
        String::from(concat!("LinkBand Monitor ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::ConfigLoadComplete((config, error_message)) => {
                info!("Config load complete");
                let auto_reconnect = config.auto_reconnect;
                self.session.set_return_to_scanner_on_drop(config.return_to_scanner_on_drop);
                self.config = config;
                if let Some(error_message) = error_message {
                    self.notices.push(error_message);
                }

                return self.issue(move |session| Box::pin(async move {
                    session.set_auto_reconnect(auto_reconnect).await;
                }));
            },
            Message::ApplyDirtyConfig => {
                if self.config_dirty {
                    self.config_dirty = false;
                    return self.save_config();
                }
            },
            Message::ConfigSaveComplete(error_message) => {
                if !self.displayed_config_save_error {
                    if let Some(error_message) = error_message {
                        self.displayed_config_save_error = true;
                        self.notices.push(error_message);
                    }
                }
            },
            Message::NoticeConfirmed => {
                if !self.notices.is_empty() {
                    self.notices.remove(0);
                }
            },
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();
                return window::close(id);
            },

            Message::SessionChanged(_) => {
                // the view reads the store directly; nothing to copy
            },
            Message::PendingTick => {
                self.dot_count = (self.dot_count % 3) + 1;
            },

            Message::StartScanPressed => {
                return self.issue(|session| Box::pin(async move { session.start_scan().await }));
            },
            Message::StopScanPressed => {
                return self.issue(|session| Box::pin(async move { session.stop_scan().await }));
            },
            Message::ConnectPressed(address) => {
                return self.issue(move |session| Box::pin(async move { session.connect(address).await }));
            },
            Message::DisconnectPressed => {
                return self.issue(|session| Box::pin(async move { session.disconnect().await }));
            },
            Message::AutoReconnectToggled(enabled) => {
                self.config.auto_reconnect = enabled;
                self.config_dirty = true;
                return self.issue(move |session| Box::pin(async move {
                    session.set_auto_reconnect(enabled).await;
                }));
            },
            Message::SensorToggled(kind, selected) => {
                return self.issue(move |session| Box::pin(async move {
                    session.select_sensor(kind, selected).await;
                }));
            },
            Message::StartSensorsPressed => {
                let session = self.session.clone();
                return Command::perform(
                    async move { session.start_selected_sensors().await },
                    Message::CommandOutcome,
                );
            },
            Message::StopSensorsPressed => {
                return self.issue(|session| Box::pin(async move {
                    session.stop_selected_sensors().await;
                }));
            },
            Message::StartRecordingPressed => {
                let session = self.session.clone();
                return Command::perform(
                    async move { session.start_recording().await },
                    Message::CommandOutcome,
                );
            },
            Message::StopRecordingPressed => {
                return self.issue(|session| Box::pin(async move { session.stop_recording().await }));
            },

            Message::CommandIssued(()) => {},
            Message::CommandOutcome(Ok(())) => {},
            Message::CommandOutcome(Err(rejected)) => {
                // buttons are gated on the same predicates, so this only
                // happens when state changed underneath a click
                warn!("Session command rejected: {}", rejected);
            },

            _ => {},
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        struct SessionBridge;

        let receivers = self.receivers.clone();
        let session = self.session.clone();
        let event_sender = self.event_sender.clone();
        let cancel = self.app_cancel.clone();

        let session_bridge = subscription::channel(
            std::any::TypeId::of::<SessionBridge>(),
            64,
            move |output| {
                run_session_bridge(
                    receivers.clone(),
                    session.clone(),
                    event_sender.clone(),
                    cancel.clone(),
                    output,
                )
            },
        );

        let mut subscriptions = vec![
            event::listen().map(Message::EventOccurred),
            iced_time_every(Duration::from_secs(1)).map(|_| Message::ApplyDirtyConfig),
            session_bridge,
        ];

        // the "pending…" animation only ticks while something is pending
        if self.any_pending_activation() {
            subscriptions.push(iced_time_every(Duration::from_millis(500)).map(|_| Message::PendingTick));
        }

        Subscription::batch(subscriptions)
    }

    fn view(&self) -> Element<Message> {
        if let Some(notice) = self.notices.first() {
            return container(
                column![
                    text(notice),

                    button(text("Okay"))
                        .on_press(Message::NoticeConfirmed),

                ].align_items(Alignment::Center).spacing(20),
            )
            .width(Length::Fill)
            .padding(20)
            .into();
        }

        let screen = match self.session.store().active_screen.get() {
            ActiveScreen::Scanner => self.scanner_view(),
            ActiveScreen::DataView => self.data_view(),
        };

        container(screen)
            .width(Length::Fill)
            .padding(20)
            .into()
    }
}

// note: subscription::channel expects the future to never resolve (Infallible).
// On the first start this also spawns the device task and the session ingest
// loop; iced deduplicates the subscription, so that happens exactly once.
async fn run_session_bridge(
    receivers: Arc<Mutex<Option<PendingReceivers>>>,
    session: Arc<Session>,
    event_sender: Sender<SessionEvent>,
    cancel: CancellationToken,
    mut output: Sender<Message>,
) -> Infallible {
    let taken = receivers.lock().expect("Failed to lock session receivers").take();

    if let Some((event_rx, command_rx)) = taken {
        let _device_task = device_sim(cancel.child_token(), event_sender, command_rx);

        let ingest_session = session.clone();
        spawn(async move {
            ingest_session.run(event_rx).await;
        });
    }

    let mut revision = session.store().subscribe_revision();

    loop {
        if revision.changed().await.is_err() {
            // store gone, nothing further to report
            return futures::future::pending::<Infallible>().await;
        }

        let value = *revision.borrow_and_update();
        if output.send(Message::SessionChanged(value)).await.is_err() {
            return futures::future::pending::<Infallible>().await;
        }
    }
}

pub fn run_application() -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let flags = ApplicationFlags { config_io };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested)
    settings.id = Some("linkband-monitor".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(600.0, 760.0);
    settings.window.resizable = false;

    // this function will call process::exit() unless there was a startup error
    MonitorApplication::run(settings)?;
    Ok(())
}
