use std::sync::Arc;
use futures::channel::mpsc::Sender;
use futures::SinkExt;
use log::warn;

use crate::error::CommandRejected;
use crate::session::store::SessionStateStore;
use crate::session::types::{SensorKind, SensorSet, SessionCommand};

/// Keeps the started-sensors snapshot and the activation-request flag
/// consistent with the externally observed collection-active boolean and the
/// user's sensor selection.
///
/// All mutation happens on the session's owning task; the coordinator itself
/// holds no state besides handles.
#[derive(Clone)]
pub struct SensorActivationCoordinator {
    store: Arc<SessionStateStore>,
    commands: Sender<SessionCommand>,
}

impl SensorActivationCoordinator {
    pub fn new(
        store: Arc<SessionStateStore>,
        commands: Sender<SessionCommand>,
    ) -> SensorActivationCoordinator {
        SensorActivationCoordinator { store, commands }
    }

    async fn send(&self, command: SessionCommand) {
        let mut sender = self.commands.clone();
        if let Err(err) = sender.send(command).await {
            warn!("Failed to send command to device session service: {:?}", err);
        }
    }

    /// Toggle membership of `kind` in the selection and forward the matching
    /// select/deselect command. Selecting an already-selected sensor is a
    /// no-op observable-wise.
    ///
    /// The toggle is one atomic read-modify-write of the selection, so a
    /// toggle racing another toggle (or a wholesale external overwrite on the
    /// ingest task) never loses an update.
    pub async fn on_selection_changed(&self, kind: SensorKind, selected: bool) {
        let changed = self.store.selected_sensors.update(|selection| {
            if selected {
                selection.insert(kind)
            } else {
                selection.shift_remove(&kind)
            }
        });

        if !changed {
            return;
        }

        self.store.bump_revision();

        if selected {
            self.send(SessionCommand::SelectSensor(kind)).await;
        } else {
            self.send(SessionCommand::DeselectSensor(kind)).await;
        }
    }

    /// Request activation of the selected sensors. Rejected (not forwarded)
    /// when nothing is selected. The collection-active flag itself is owned by
    /// the external service and arrives later as an event.
    pub async fn on_start_requested(&self) -> Result<(), CommandRejected> {
        if self.store.selected_sensors.get().is_empty() {
            return Err(CommandRejected::NothingSelected);
        }

        self.store.activation_requested.set(true);
        self.store.bump_revision();
        self.send(SessionCommand::StartSelectedSensors).await;
        Ok(())
    }

    /// Stop the running collection. A stop issued while activation is still
    /// in flight also withdraws the request; the service cancels the
    /// activation, so no collection-active transition would clear it.
    pub async fn on_stop_requested(&self) {
        if self.store.activation_requested.set(false) {
            self.store.bump_revision();
        }
        self.send(SessionCommand::StopSelectedSensors).await;
    }

    /// The single reconciliation point, and the only writer of the
    /// started-sensors snapshot. A transition without a matching prior start
    /// request (auto-reconnect resuming a session) is valid and handled the
    /// same way.
    pub fn on_collection_active_changed(&self, active: bool) {
        if active {
            let snapshot = self.store.selected_sensors.get();
            self.store.started_sensors.set(snapshot);
        } else {
            self.store.started_sensors.set(SensorSet::new());
        }

        self.store.activation_requested.set(false);
        self.store.collection_active.set(active);
        self.store.bump_revision();
    }

    pub fn is_pending_activation(&self, kind: SensorKind) -> bool {
        self.store.is_pending_activation(kind)
    }
}
