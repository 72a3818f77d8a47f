use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::commands::Overrides;
use crate::config::Config;
use crate::model::{AllocationResult, Phases, VehicleAllocation, VehicleReading};
use crate::safety::CooldownTimers;
use crate::tracker::CalendarHourTracker;

/// Pipeline stage currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Safety,
    Constraints,
    Intent,
    Optimization,
}

/// Coordinator run state: `Idle -> Running(stage) -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running(Stage),
}

impl RunState {
    pub const fn is_running(&self) -> bool {
        matches!(self, RunState::Running(_))
    }
}

/// Last limit a charger acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentCommand {
    pub allocation: VehicleAllocation,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounters {
    pub total: u64,
    /// Cycles that took longer than the poll interval
    pub overruns: u64,
    pub command_failures: u64,
}

/// Everything the coordinator carries from one cycle to the next.
///
/// Accumulator and cooldowns live only in memory and start empty on every
/// process start.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorState {
    pub run_state: RunState,
    pub tracker: CalendarHourTracker,
    pub cooldowns: CooldownTimers,
    /// Phase count each vehicle is currently assigned
    pub phases: BTreeMap<String, Phases>,
    pub last_result: Option<AllocationResult>,
    pub last_sent: BTreeMap<String, SentCommand>,
    /// Last successful reading per vehicle, used while a vehicle is held
    pub readings: BTreeMap<String, VehicleReading>,
    pub overrides: Overrides,
    pub counters: CycleCounters,
}

impl CoordinatorState {
    pub fn new(config: &Config, overrides: Overrides) -> Self {
        Self {
            run_state: RunState::Idle,
            tracker: CalendarHourTracker::new(),
            cooldowns: CooldownTimers::new(),
            phases: config
                .vehicles
                .iter()
                .map(|v| (v.id.clone(), v.phases))
                .collect(),
            last_result: None,
            last_sent: BTreeMap::new(),
            readings: BTreeMap::new(),
            overrides,
            counters: CycleCounters::default(),
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        self.run_state = RunState::Running(stage);
    }

    pub fn finish(&mut self) {
        self.run_state = RunState::Idle;
    }

    /// Allocation a vehicle received in the previous cycle
    pub fn last_allocation(&self, vehicle_id: &str) -> Option<VehicleAllocation> {
        self.last_result
            .as_ref()
            .and_then(|r| r.get(vehicle_id))
            .copied()
    }

    /// Undo this cycle's decision for a vehicle whose charger command failed.
    ///
    /// The vehicle falls back to what its charger last acknowledged, its
    /// phase count to `previous_phases`, and a cooldown started for a phase
    /// change that never reached the charger is cancelled.
    pub fn rollback_vehicle(
        &mut self,
        vehicle_id: &str,
        previous_phases: Phases,
        phase_changed: bool,
    ) {
        self.phases.insert(vehicle_id.to_string(), previous_phases);
        if phase_changed {
            self.cooldowns.cancel(vehicle_id);
        }
        let retained = self
            .last_sent
            .get(vehicle_id)
            .map(|sent| sent.allocation)
            .unwrap_or(VehicleAllocation::off(previous_phases));
        if let Some(result) = self.last_result.as_mut() {
            result.allocations.insert(vehicle_id.to_string(), retained);
        }
    }
}
