use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::Coordinator;
use crate::config::{Config, VehicleConfig, validate_power_limit, validate_target_soc};
use crate::error::{Result, SmartEvError};
use crate::model::{VehicleReading, VehicleState};

/// Runtime inputs accepted between cycles
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetPowerLimit(f64),
    SetTargetSoc { vehicle_id: String, pct: u8 },
    SetForceCharge { vehicle_id: String, enabled: bool },
    SetPauseAll(bool),
    /// Choose which vehicle a shared charger belongs to; `None` clears the choice
    AssignCharger {
        charger: String,
        vehicle_id: Option<String>,
    },
    RunNow,
}

/// What an accepted command asks of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEffect {
    /// Overrides changed and should be persisted
    Updated,
    /// Run a cycle immediately
    RunNow,
}

/// User overrides layered on top of the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub power_limit_kw: Option<f64>,
    pub target_soc_pct: BTreeMap<String, u8>,
    /// Explicit force-charge choice per vehicle; wins over the Home Assistant entity
    pub force_charge: BTreeMap<String, bool>,
    pub pause_all: bool,
    /// Charger status entity -> vehicle id
    pub assignments: BTreeMap<String, String>,
}

impl Overrides {
    pub fn power_limit_kw(&self, config: &Config) -> f64 {
        self.power_limit_kw.unwrap_or(config.limits.power_limit_kw)
    }

    pub fn target_soc_pct(&self, vehicle: &VehicleConfig) -> u8 {
        self.target_soc_pct
            .get(&vehicle.id)
            .copied()
            .unwrap_or(vehicle.target_soc_pct)
    }

    /// Runtime force-charge choice, `None` when the entity decides
    pub fn force_charge_override(&self, vehicle_id: &str) -> Option<bool> {
        self.force_charge.get(vehicle_id).copied()
    }

    /// Validate and apply a command
    pub fn apply(&mut self, command: &ControlCommand, config: &Config) -> Result<CommandEffect> {
        match command {
            ControlCommand::SetPowerLimit(kw) => {
                validate_power_limit(*kw)?;
                self.power_limit_kw = Some(*kw);
            }
            ControlCommand::SetTargetSoc { vehicle_id, pct } => {
                known_vehicle(config, vehicle_id)?;
                validate_target_soc(*pct)?;
                self.target_soc_pct.insert(vehicle_id.clone(), *pct);
            }
            ControlCommand::SetForceCharge {
                vehicle_id,
                enabled,
            } => {
                known_vehicle(config, vehicle_id)?;
                self.force_charge.insert(vehicle_id.clone(), *enabled);
            }
            ControlCommand::SetPauseAll(paused) => self.pause_all = *paused,
            ControlCommand::AssignCharger {
                charger,
                vehicle_id: None,
            } => {
                self.assignments.remove(charger);
            }
            ControlCommand::AssignCharger {
                charger,
                vehicle_id: Some(vehicle_id),
            } => {
                let vehicle = known_vehicle(config, vehicle_id)?;
                if vehicle.charger.status_entity != *charger {
                    return Err(SmartEvError::validation(
                        "charger",
                        format!("Vehicle '{}' is not bound to charger '{}'", vehicle_id, charger),
                    ));
                }
                self.assignments.insert(charger.clone(), vehicle_id.clone());
            }
            ControlCommand::RunNow => return Ok(CommandEffect::RunNow),
        }
        Ok(CommandEffect::Updated)
    }

    /// Drop overrides that refer to vehicles no longer configured
    pub fn retain_configured(&mut self, config: &Config) {
        let known: BTreeSet<&str> = config.vehicles.iter().map(|v| v.id.as_str()).collect();
        self.target_soc_pct.retain(|id, _| known.contains(id.as_str()));
        self.force_charge.retain(|id, _| known.contains(id.as_str()));
        self.assignments.retain(|charger, id| {
            config
                .vehicle(id)
                .is_some_and(|v| v.charger.status_entity == *charger)
        });
        if self.power_limit_kw.is_some_and(|kw| validate_power_limit(kw).is_err()) {
            self.power_limit_kw = None;
        }
    }

    /// Merge configuration, a fresh reading and the overrides into one vehicle state
    pub fn vehicle_state(&self, config: &VehicleConfig, reading: &VehicleReading) -> VehicleState {
        let mut state = VehicleState::from_reading(config, reading);
        state.target_soc_pct = self.target_soc_pct(config);
        state.force_charge = self
            .force_charge_override(&config.id)
            .unwrap_or(reading.force_charge);
        state
    }
}

fn known_vehicle<'a>(config: &'a Config, vehicle_id: &str) -> Result<&'a VehicleConfig> {
    config.vehicle(vehicle_id).ok_or_else(|| {
        SmartEvError::validation("vehicle_id", format!("Unknown vehicle '{}'", vehicle_id))
    })
}

/// Only one vehicle can be plugged into a charger at a time. Where several
/// vehicles share a charger status entity, keep the assigned one (or the
/// first by priority, then id) and report the others disconnected.
pub fn resolve_shared_chargers(
    vehicles: &mut [VehicleState],
    configs: &[VehicleConfig],
    assignments: &BTreeMap<String, String>,
) {
    let mut by_charger: BTreeMap<&str, Vec<&VehicleConfig>> = BTreeMap::new();
    for config in configs {
        by_charger
            .entry(config.charger.status_entity.as_str())
            .or_default()
            .push(config);
    }

    let mut losers: BTreeSet<&str> = BTreeSet::new();
    for (charger, mut group) in by_charger {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        let first: &VehicleConfig = group[0];
        let owner = assignments
            .get(charger)
            .filter(|id| group.iter().any(|v| v.id == **id))
            .map_or(first.id.as_str(), String::as_str);
        losers.extend(
            group
                .iter()
                .copied()
                .map(|v| v.id.as_str())
                .filter(|id| *id != owner),
        );
    }

    for vehicle in vehicles.iter_mut() {
        if losers.contains(vehicle.id.as_str()) {
            vehicle.connected = false;
        }
    }
}

impl Coordinator {
    /// Apply one command; returns whether a cycle should run right away
    pub fn handle_command(&mut self, command: ControlCommand) -> bool {
        match self.state.overrides.apply(&command, &self.config) {
            Ok(CommandEffect::RunNow) => true,
            Ok(CommandEffect::Updated) => {
                self.logger.info(&format!("Applied control command {:?}", command));
                self.persistence.set_overrides(self.state.overrides.clone());
                if let Err(e) = self.persistence.save() {
                    self.logger
                        .warn(&format!("Failed to persist runtime overrides: {}", e));
                }
                // Overrides change the decision
                true
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Rejected control command {:?}: {}", command, e));
                false
            }
        }
    }
}
