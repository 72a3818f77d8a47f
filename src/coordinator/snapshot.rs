use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::pipeline::CycleReport;
use super::state::{CoordinatorState, CycleCounters, RunState};
use crate::config::Config;
use crate::model::VehicleState;

/// Per-vehicle part of a published decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub name: String,
    pub allocated_amps: u32,
    pub allocated_phases: u8,
    pub charging: bool,
    pub connected: bool,
    pub current_soc_pct: Option<f64>,
    pub target_soc_pct: u8,
    pub force_charge: bool,
    /// Reading failed this cycle; previous allocation kept
    pub held: bool,
    /// The charger did not accept this cycle's limit
    pub command_failed: bool,
    pub cooldown_remaining_s: i64,
}

/// Everything presentation layers need about the latest decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub timestamp: Option<String>,
    pub run_state: String,
    pub decision_reason: String,
    pub safe_mode: bool,
    pub paused: bool,
    pub grid_rewards_active: bool,
    pub obc_cooldown_active: bool,
    pub calendar_hour_avg_kw: f64,
    pub available_capacity_kw: f64,
    pub power_limit_kw: f64,
    pub export_revenue: Option<f64>,
    pub night_charge_cost: Option<f64>,
    pub opportunity_cost: Option<f64>,
    pub vehicles: BTreeMap<String, VehicleSnapshot>,
    pub total_cycles: u64,
    pub overrun_count: u64,
    pub command_failures: u64,
    pub cycle_duration_ms: Option<u64>,
}

impl DecisionSnapshot {
    /// Placeholder published before the first cycle completes
    pub fn initial(config: &Config, state: &CoordinatorState) -> Self {
        let vehicles = config
            .vehicles
            .iter()
            .map(|v| {
                (
                    v.id.clone(),
                    VehicleSnapshot {
                        name: v.name.clone(),
                        allocated_amps: 0,
                        allocated_phases: v.phases.count(),
                        charging: false,
                        connected: false,
                        current_soc_pct: None,
                        target_soc_pct: state.overrides.target_soc_pct(v),
                        force_charge: state.overrides.force_charge_override(&v.id).unwrap_or(false),
                        held: false,
                        command_failed: false,
                        cooldown_remaining_s: 0,
                    },
                )
            })
            .collect();

        Self {
            timestamp: None,
            run_state: run_state_label(state.run_state),
            decision_reason: "starting".to_string(),
            safe_mode: false,
            paused: state.overrides.pause_all,
            grid_rewards_active: false,
            obc_cooldown_active: false,
            calendar_hour_avg_kw: 0.0,
            available_capacity_kw: 0.0,
            power_limit_kw: state.overrides.power_limit_kw(config),
            export_revenue: None,
            night_charge_cost: None,
            opportunity_cost: None,
            vehicles,
            total_cycles: 0,
            overrun_count: 0,
            command_failures: 0,
            cycle_duration_ms: None,
        }
    }

    /// Build from a finished cycle and the state it left behind
    pub fn from_cycle(
        report: &CycleReport,
        state: &CoordinatorState,
        vehicles: &[VehicleState],
        grid_rewards_active: bool,
        held: &BTreeSet<String>,
        failed: &BTreeSet<String>,
        cycle_duration_ms: Option<u64>,
    ) -> Self {
        let now = report.timestamp;
        // Rollbacks after failed commands are already reflected here
        let result = state.last_result.as_ref().unwrap_or(&report.result);

        let vehicles = vehicles
            .iter()
            .map(|v| {
                let alloc = result.get(&v.id).copied();
                (
                    v.id.clone(),
                    VehicleSnapshot {
                        name: v.name.clone(),
                        allocated_amps: alloc.map_or(0, |a| a.amps),
                        allocated_phases: alloc.map_or(v.phases.count(), |a| a.phases.count()),
                        charging: alloc.is_some_and(|a| a.is_charging()) && v.connected,
                        connected: v.connected,
                        current_soc_pct: v.current_soc_pct,
                        target_soc_pct: v.target_soc_pct,
                        force_charge: v.force_charge,
                        held: held.contains(&v.id),
                        command_failed: failed.contains(&v.id),
                        cooldown_remaining_s: state.cooldowns.remaining_seconds(&v.id, now),
                    },
                )
            })
            .collect();

        let economics = report.economics.as_ref();
        let CycleCounters {
            total,
            overruns,
            command_failures,
        } = state.counters;

        Self {
            timestamp: Some(now.to_rfc3339()),
            run_state: run_state_label(state.run_state),
            decision_reason: result.decision_reason.clone(),
            safe_mode: result.safe_mode,
            paused: state.overrides.pause_all,
            grid_rewards_active,
            obc_cooldown_active: !state.cooldowns.active(now).is_empty(),
            calendar_hour_avg_kw: report.average_kw,
            available_capacity_kw: report.headroom_kw.unwrap_or(0.0),
            power_limit_kw: report.power_limit_kw,
            export_revenue: economics.map(|e| e.export_revenue),
            night_charge_cost: economics.and_then(|e| e.night_charge_cost),
            opportunity_cost: economics.and_then(|e| e.opportunity_cost()),
            vehicles,
            total_cycles: total,
            overrun_count: overruns,
            command_failures,
            cycle_duration_ms,
        }
    }
}

fn run_state_label(run_state: RunState) -> String {
    match run_state {
        RunState::Idle => "idle".to_string(),
        RunState::Running(stage) => format!("running:{:?}", stage).to_lowercase(),
    }
}
