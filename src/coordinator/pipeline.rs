//! One synchronous pass of the four-stage decision pipeline
//!
//! All I/O happens before (reading collaborators) and after (dispatching
//! limits) this function, so a cycle can be replayed from its inputs.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::state::{CoordinatorState, Stage};
use crate::allocator::{AllocationOutcome, Allocator, AllocatorSettings, PhaseContext, REASON_SEPARATOR};
use crate::config::Config;
use crate::economics::{self, OpportunityCost};
use crate::logging::get_logger;
use crate::model::{AllocationResult, Phases, PriceContext, SiteSample, VehicleAllocation, VehicleState};
use crate::safety::{SafetyEvaluator, SafetyInputs, SafetyVerdict};

/// Static pipeline parameters derived from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub safety: SafetyEvaluator,
    pub allocator: Allocator,
    pub obc_cooldown: Duration,
    /// Used when no runtime override is set
    pub default_power_limit_kw: f64,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let controls = &config.controls;
        Self {
            safety: SafetyEvaluator::from_controls(controls),
            allocator: Allocator::new(AllocatorSettings::from(controls)),
            obc_cooldown: Duration::seconds(
                i64::try_from(controls.obc_cooldown_seconds).unwrap_or(i64::MAX / 1000),
            ),
            default_power_limit_kw: config.limits.power_limit_kw,
        }
    }
}

/// Everything a cycle reads from the outside world
#[derive(Debug, Clone, Default)]
pub struct CycleInputs {
    /// `None` when the site sample could not be read
    pub sample: Option<SiteSample>,
    pub grid_rewards_active: bool,
    /// `None` when the price collaborator failed
    pub prices: Option<PriceContext>,
    /// One state per configured vehicle
    pub vehicles: Vec<VehicleState>,
    /// Vehicles whose reading failed; they keep last cycle's allocation
    pub held: BTreeSet<String>,
}

/// The decision of one cycle plus what led to it
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub result: AllocationResult,
    pub verdict: SafetyVerdict,
    /// Absent when safety short-circuited the pipeline
    pub economics: Option<OpportunityCost>,
    /// Headroom handed to the allocator, absent when safety short-circuited
    pub headroom_kw: Option<f64>,
    pub average_kw: f64,
    pub power_limit_kw: f64,
    /// Vehicles that changed phase count this cycle
    pub phase_changes: Vec<String>,
    /// Phase assignment before this cycle, for rollback
    pub previous_phases: BTreeMap<String, Phases>,
}

impl CycleReport {
    pub fn phase_changed(&self, vehicle_id: &str) -> bool {
        self.phase_changes.iter().any(|id| id == vehicle_id)
    }
}

/// Run safety, constraints, intent and optimization for one instant.
///
/// `SafeMode` and `PauseAll` skip the allocation stages. The sample is still
/// recorded by the tracker during a pause so the hour's energy stays exact.
pub fn run_cycle(
    state: &mut CoordinatorState,
    settings: &PipelineSettings,
    inputs: &CycleInputs,
    now: DateTime<Utc>,
) -> CycleReport {
    let logger = get_logger("pipeline");
    let power_limit_kw = state
        .overrides
        .power_limit_kw
        .unwrap_or(settings.default_power_limit_kw);
    let previous_phases = state.phases.clone();

    state.enter(Stage::Safety);
    state.cooldowns.clear_expired(now);
    let verdict = settings.safety.evaluate(
        SafetyInputs {
            sample: inputs.sample.as_ref(),
            grid_meter_available: inputs.sample.is_some(),
            grid_rewards_active: inputs.grid_rewards_active,
            pause_requested: state.overrides.pause_all,
        },
        &state.cooldowns,
        now,
    );
    logger.debug(&format!("Stage safety: {}", verdict.reason()));

    let mut report = CycleReport {
        timestamp: now,
        result: AllocationResult::default(),
        verdict: verdict.clone(),
        economics: None,
        headroom_kw: None,
        average_kw: 0.0,
        power_limit_kw,
        phase_changes: Vec::new(),
        previous_phases,
    };

    match verdict {
        SafetyVerdict::SafeMode { max_amps, reason } => {
            report.result = safe_mode_result(state, &inputs.vehicles, max_amps, reason);
        }
        SafetyVerdict::PauseAll { reason, .. } => {
            if let Some(sample) = inputs.sample.as_ref() {
                state.tracker.record(sample.grid_power_w, now);
            }
            report.result = paused_result(state, &inputs.vehicles, reason);
        }
        SafetyVerdict::Normal { cooldown, .. } => {
            // Normal implies a sample is present
            let grid_power_w = inputs.sample.map_or(0.0, |s| s.grid_power_w);

            state.enter(Stage::Constraints);
            let headroom_kw = state.tracker.update(grid_power_w, now, power_limit_kw);
            logger.debug(&format!(
                "Stage constraints: avg={:.2}kW headroom={:.2}kW",
                state.tracker.average_kw_so_far(now),
                headroom_kw
            ));

            let voltage = settings.allocator.settings().voltage;
            let held: BTreeMap<String, VehicleAllocation> = inputs
                .vehicles
                .iter()
                .filter(|v| inputs.held.contains(&v.id))
                .map(|v| {
                    let phases = state.phases.get(&v.id).copied().unwrap_or(v.phases);
                    let alloc = state
                        .last_allocation(&v.id)
                        .unwrap_or(VehicleAllocation::off(phases));
                    (v.id.clone(), alloc)
                })
                .collect();
            let held_kw: f64 = held.values().map(|a| a.power_w(voltage)).sum::<f64>() / 1000.0;
            let available_kw = (headroom_kw - held_kw).max(0.0);

            state.enter(Stage::Intent);
            let active: Vec<VehicleState> = inputs
                .vehicles
                .iter()
                .filter(|v| !inputs.held.contains(&v.id))
                .cloned()
                .collect();
            let forced = active.iter().filter(|v| v.connected && v.force_charge).count();
            logger.debug(&format!("Stage intent: {} force-charged vehicle(s)", forced));

            state.enter(Stage::Optimization);
            let opportunity = match inputs.prices.as_ref() {
                Some(prices) => economics::evaluate(prices),
                None => OpportunityCost::prices_unavailable(),
            };
            logger.debug(&format!(
                "Stage optimization: {} (export {:.3}, night {:?})",
                opportunity.reason, opportunity.export_revenue, opportunity.night_charge_cost
            ));

            let AllocationOutcome {
                mut result,
                phase_changes,
                ..
            } = settings.allocator.allocate(
                available_kw,
                &active,
                &opportunity,
                PhaseContext {
                    current: &state.phases,
                    cooldown: &cooldown,
                },
            );

            for id in &phase_changes {
                if let Some(alloc) = result.get(id) {
                    state.phases.insert(id.clone(), alloc.phases);
                    state.cooldowns.start(id, now, settings.obc_cooldown);
                    logger.info(&format!(
                        "Phase change for {}: now {} phase(s), cooldown started",
                        id,
                        alloc.phases.count()
                    ));
                }
            }

            if !held.is_empty() {
                let ids: Vec<&str> = held.keys().map(String::as_str).collect();
                result.decision_reason = format!(
                    "{}{}held: {}",
                    result.decision_reason,
                    REASON_SEPARATOR,
                    ids.join(",")
                );
                result.allocations.extend(held);
            }

            report.economics = Some(opportunity);
            report.headroom_kw = Some(headroom_kw);
            report.phase_changes = phase_changes;
            report.result = result;
        }
    }

    report.average_kw = state.tracker.average_kw_so_far(now);
    state.last_result = Some(report.result.clone());
    state.finish();
    report
}

/// Every connected vehicle gets the safe-mode current on its retained phase count
fn safe_mode_result(
    state: &CoordinatorState,
    vehicles: &[VehicleState],
    max_amps: u32,
    reason: String,
) -> AllocationResult {
    let allocations = vehicles
        .iter()
        .map(|v| {
            let phases = state.phases.get(&v.id).copied().unwrap_or(v.phases);
            let amps = if v.connected { v.max_amps.min(max_amps) } else { 0 };
            (v.id.clone(), VehicleAllocation { amps, phases })
        })
        .collect();
    AllocationResult {
        allocations,
        decision_reason: reason,
        safe_mode: true,
    }
}

fn paused_result(
    state: &CoordinatorState,
    vehicles: &[VehicleState],
    reason: String,
) -> AllocationResult {
    let allocations = vehicles
        .iter()
        .map(|v| {
            let phases = state.phases.get(&v.id).copied().unwrap_or(v.phases);
            (v.id.clone(), VehicleAllocation::off(phases))
        })
        .collect();
    AllocationResult {
        allocations,
        decision_reason: reason,
        safe_mode: false,
    }
}
