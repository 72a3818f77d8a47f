//! Priority allocation of the hour's headroom across vehicles
//!
//! Two greedy passes share one power pool: force-charged vehicles first,
//! then (unless the economics say wait) every other connected vehicle that
//! is still below its target. Within a pass vehicles are served by
//! priority, ties broken by id.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ControlsConfig;
use crate::economics::{EconomicVerdict, OpportunityCost};
use crate::model::{AllocationResult, Phases, VehicleAllocation, VehicleState};

/// Reason token separator used across the pipeline
pub const REASON_SEPARATOR: &str = " | ";

/// Allocation tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatorSettings {
    pub voltage: f64,
    pub min_charging_amps: u32,
    /// Extra power an alternative phase count must unlock before switching
    pub phase_switch_min_gain_w: f64,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self::from(&ControlsConfig::default())
    }
}

impl From<&ControlsConfig> for AllocatorSettings {
    fn from(controls: &ControlsConfig) -> Self {
        Self {
            voltage: controls.voltage,
            min_charging_amps: controls.min_charging_amps,
            phase_switch_min_gain_w: controls.phase_switch_min_gain_w.max(0.0),
        }
    }
}

/// Per-vehicle phase history the allocator must respect
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    /// Phase count each vehicle was last assigned
    pub current: &'a BTreeMap<String, Phases>,
    /// Vehicles that may not change phase count this cycle
    pub cooldown: &'a BTreeSet<String>,
}

/// Allocation plus the bookkeeping the coordinator needs
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub result: AllocationResult,
    /// Vehicles whose phase count differs from `PhaseContext::current`
    pub phase_changes: Vec<String>,
    /// Headroom left after both passes, W
    pub unallocated_w: f64,
}

/// Distributes headroom by priority
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    settings: AllocatorSettings,
}

impl Allocator {
    pub fn new(settings: AllocatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    /// Allocate `headroom_kw` across `vehicles`.
    ///
    /// Every vehicle appears in the result; disconnected, deferred or full
    /// vehicles get 0 A on their retained phase count. The summed power of
    /// all allocations never exceeds `headroom_kw`.
    pub fn allocate(
        &self,
        headroom_kw: f64,
        vehicles: &[VehicleState],
        economics: &OpportunityCost,
        phases: PhaseContext<'_>,
    ) -> AllocationOutcome {
        let mut remaining_w = if headroom_kw.is_finite() {
            (headroom_kw * 1000.0).max(0.0)
        } else {
            0.0
        };

        let mut allocations: BTreeMap<String, VehicleAllocation> = vehicles
            .iter()
            .map(|v| {
                (
                    v.id.clone(),
                    VehicleAllocation::off(retained_phases(v, phases.current)),
                )
            })
            .collect();

        let mut ordered: Vec<&VehicleState> = vehicles.iter().collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut reasons: Vec<String> = Vec::new();

        // Forced pass
        let forced: Vec<&VehicleState> = ordered
            .iter()
            .copied()
            .filter(|v| v.connected && v.force_charge)
            .collect();
        if !forced.is_empty() {
            for vehicle in &forced {
                let alloc = self.allocate_one(vehicle, remaining_w, phases);
                remaining_w -= alloc.power_w(self.settings.voltage);
                allocations.insert(vehicle.id.clone(), alloc);
            }
            reasons.push("force_charge".to_string());
        }

        // Economic pass
        match economics.verdict {
            EconomicVerdict::DeferToNight => {
                reasons.push(format!(
                    "{} (export {:.3} > night {:.3})",
                    economics.reason,
                    economics.export_revenue,
                    economics.night_charge_cost.unwrap_or_default()
                ));
            }
            EconomicVerdict::ChargeNow => {
                for vehicle in ordered
                    .iter()
                    .filter(|v| v.connected && !v.force_charge && v.needs_charge())
                {
                    let alloc = self.allocate_one(vehicle, remaining_w, phases);
                    remaining_w -= alloc.power_w(self.settings.voltage);
                    allocations.insert(vehicle.id.clone(), alloc);
                }
                reasons.push(economics.reason.to_string());
            }
        }

        let phase_changes = allocations
            .iter()
            .filter(|(id, alloc)| {
                phases
                    .current
                    .get(id.as_str())
                    .is_some_and(|prev| *prev != alloc.phases)
            })
            .map(|(id, _)| id.clone())
            .collect();

        AllocationOutcome {
            result: AllocationResult {
                allocations,
                decision_reason: reasons.join(REASON_SEPARATOR),
                safe_mode: false,
            },
            phase_changes,
            unallocated_w: remaining_w.max(0.0),
        }
    }

    /// Best allocation for one vehicle out of `remaining_w`
    fn allocate_one(
        &self,
        vehicle: &VehicleState,
        remaining_w: f64,
        phases: PhaseContext<'_>,
    ) -> VehicleAllocation {
        let retained = retained_phases(vehicle, phases.current);
        let keep = VehicleAllocation {
            amps: self.viable_amps(vehicle, retained, remaining_w),
            phases: retained,
        };

        if vehicle.phases == Phases::One || phases.cooldown.contains(&vehicle.id) {
            return keep;
        }

        let alternative = match retained {
            Phases::One => Phases::Three,
            Phases::Three => Phases::One,
        };
        let switched = VehicleAllocation {
            amps: self.viable_amps(vehicle, alternative, remaining_w),
            phases: alternative,
        };

        let gain = switched.power_w(self.settings.voltage) - keep.power_w(self.settings.voltage);
        if switched.is_charging() && gain >= self.settings.phase_switch_min_gain_w {
            switched
        } else {
            keep
        }
    }

    /// Whole amps on `phases` that fit `remaining_w`, capped at the vehicle
    /// maximum; anything below the minimum charging current becomes 0.
    fn viable_amps(&self, vehicle: &VehicleState, phases: Phases, remaining_w: f64) -> u32 {
        let amps = phases
            .amps_for_power(remaining_w, self.settings.voltage)
            .min(vehicle.max_amps);
        if amps < self.settings.min_charging_amps {
            0
        } else {
            amps
        }
    }
}

/// Phase count a vehicle keeps absent a switch decision
pub fn retained_phases(vehicle: &VehicleState, current: &BTreeMap<String, Phases>) -> Phases {
    match (vehicle.phases, current.get(&vehicle.id)) {
        (Phases::One, _) => Phases::One,
        (Phases::Three, Some(prev)) => *prev,
        (Phases::Three, None) => Phases::Three,
    }
}
