//! Decision pipeline coordinator
//!
//! The coordinator is the single owner of run-to-run state (hour
//! accumulator, cooldown timers, last decision, runtime overrides). It runs
//! the pipeline on a fixed interval, applies control commands between
//! cycles, sends the resulting limits to the chargers and publishes a
//! snapshot of every decision.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::{Result, SmartEvError};
use crate::logging::StructuredLogger;
use crate::persistence::PersistenceManager;

mod commands;
mod dispatch;
mod pipeline;
mod runtime;
mod snapshot;
mod state;

pub use commands::{CommandEffect, ControlCommand, Overrides, resolve_shared_chargers};
pub use dispatch::{
    CommandOutcome, RetryPolicy, needs_send, read_with_retry, send_with_retry, with_timeout,
};
pub use pipeline::{CycleInputs, CycleReport, PipelineSettings, run_cycle};
pub use snapshot::{DecisionSnapshot, VehicleSnapshot};
pub use state::{CoordinatorState, CycleCounters, RunState, SentCommand, Stage};

/// Runs the decision pipeline and owns all of its state
pub struct Coordinator {
    config: Config,
    settings: PipelineSettings,
    retry: RetryPolicy,
    state: CoordinatorState,
    collaborators: Collaborators,
    persistence: PersistenceManager,
    logger: StructuredLogger,
    commands_rx: mpsc::UnboundedReceiver<ControlCommand>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    snapshot_tx: watch::Sender<Arc<DecisionSnapshot>>,
}

/// Cloneable handle for the web API and the binary
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands_tx: mpsc::UnboundedSender<ControlCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    snapshot_rx: watch::Receiver<Arc<DecisionSnapshot>>,
}

impl CoordinatorHandle {
    /// Queue a control command; applied before the next cycle
    pub fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands_tx
            .send(command)
            .map_err(|_| SmartEvError::generic("Coordinator is not running"))
    }

    /// Ask the coordinator to stop after the cycle in flight
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Latest published decision
    pub fn snapshot(&self) -> Arc<DecisionSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that yields every new decision
    pub fn subscribe(&self) -> watch::Receiver<Arc<DecisionSnapshot>> {
        self.snapshot_rx.clone()
    }
}

#[cfg(test)]
impl CoordinatorHandle {
    /// Handle with no coordinator behind it; commands land in the returned receiver
    pub(crate) fn detached(
        snapshot: DecisionSnapshot,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ControlCommand>,
        watch::Sender<Arc<DecisionSnapshot>>,
    ) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(snapshot));
        let handle = Self {
            commands_tx,
            shutdown_tx,
            snapshot_rx,
        };
        (handle, commands_rx, snapshot_tx)
    }
}
