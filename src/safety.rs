//! Safety checks for EV charging decisions
//!
//! Evaluated first in every cycle. A `SafeMode` or `PauseAll` verdict
//! short-circuits the remaining pipeline stages.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::SiteSample;

/// Per-vehicle cooldown timers started by phase-count changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooldownTimers {
    expires_at: BTreeMap<String, DateTime<Utc>>,
}

impl CooldownTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the cooldown for a vehicle
    pub fn start(&mut self, vehicle_id: &str, now: DateTime<Utc>, duration: Duration) {
        self.expires_at.insert(vehicle_id.to_string(), now + duration);
    }

    /// Cancel a cooldown, e.g. when the phase change it guarded never reached the charger
    pub fn cancel(&mut self, vehicle_id: &str) {
        self.expires_at.remove(vehicle_id);
    }

    pub fn expires_at(&self, vehicle_id: &str) -> Option<DateTime<Utc>> {
        self.expires_at.get(vehicle_id).copied()
    }

    pub fn is_active(&self, vehicle_id: &str, now: DateTime<Utc>) -> bool {
        self.expires_at
            .get(vehicle_id)
            .is_some_and(|expires| now < *expires)
    }

    /// Seconds left on a vehicle's cooldown, 0 when none is running
    pub fn remaining_seconds(&self, vehicle_id: &str, now: DateTime<Utc>) -> i64 {
        self.expires_at
            .get(vehicle_id)
            .map_or(0, |expires| (*expires - now).num_seconds().max(0))
    }

    /// Drop every timer with `now >= expires_at`
    pub fn clear_expired(&mut self, now: DateTime<Utc>) {
        self.expires_at.retain(|_, expires| now < *expires);
    }

    /// Vehicles currently under cooldown
    pub fn active(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        self.expires_at
            .iter()
            .filter(|(_, expires)| now < **expires)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Why every vehicle is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    /// The user switched on `pause_all_charging`
    Manual,
    /// The home battery is exporting during a Grid Rewards event
    GridRewards,
}

/// Outcome of the safety stage
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyVerdict {
    /// Grid meter lost: every connected vehicle is capped at `max_amps`
    SafeMode { max_amps: u32, reason: String },
    /// Zero allocation for every vehicle
    PauseAll { cause: PauseCause, reason: String },
    /// Continue with the full pipeline. Vehicles in `cooldown` keep their phase count.
    Normal {
        cooldown: BTreeSet<String>,
        reason: String,
    },
}

impl SafetyVerdict {
    pub fn reason(&self) -> &str {
        match self {
            SafetyVerdict::SafeMode { reason, .. }
            | SafetyVerdict::PauseAll { reason, .. }
            | SafetyVerdict::Normal { reason, .. } => reason,
        }
    }

    pub const fn is_safe_mode(&self) -> bool {
        matches!(self, SafetyVerdict::SafeMode { .. })
    }
}

/// Inputs to one safety evaluation
#[derive(Debug, Clone, Copy)]
pub struct SafetyInputs<'a> {
    /// `None` when the site sample could not be read at all
    pub sample: Option<&'a SiteSample>,
    pub grid_meter_available: bool,
    pub grid_rewards_active: bool,
    pub pause_requested: bool,
}

/// Evaluates safety conditions for EV charging
#[derive(Debug, Clone)]
pub struct SafetyEvaluator {
    /// Battery export in W beyond which a Grid Rewards event pauses charging
    pub export_threshold_w: f64,
    /// Per-vehicle current while the grid meter is unavailable
    pub safe_mode_amps: u32,
}

impl Default for SafetyEvaluator {
    fn default() -> Self {
        Self {
            export_threshold_w: 0.0,
            safe_mode_amps: 6,
        }
    }
}

impl SafetyEvaluator {
    pub fn from_controls(controls: &crate::config::ControlsConfig) -> Self {
        Self {
            export_threshold_w: controls.export_threshold_w.max(0.0),
            safe_mode_amps: controls.safe_mode_amps,
        }
    }

    /// Run safety checks in fixed priority order; first match wins:
    ///
    /// 1. manual pause -> `PauseAll`
    /// 2. grid meter unavailable -> `SafeMode`
    /// 3. Grid Rewards active and battery exporting -> `PauseAll`
    /// 4. otherwise -> `Normal` annotated with vehicles under cooldown
    pub fn evaluate(
        &self,
        inputs: SafetyInputs<'_>,
        cooldowns: &CooldownTimers,
        now: DateTime<Utc>,
    ) -> SafetyVerdict {
        if inputs.pause_requested {
            return SafetyVerdict::PauseAll {
                cause: PauseCause::Manual,
                reason: "manual_pause".to_string(),
            };
        }

        let sample = match inputs.sample {
            Some(sample) if inputs.grid_meter_available => sample,
            _ => {
                return SafetyVerdict::SafeMode {
                    max_amps: self.safe_mode_amps,
                    reason: format!(
                        "grid_meter_unavailable_safe_mode (cap {} A)",
                        self.safe_mode_amps
                    ),
                };
            }
        };

        if inputs.grid_rewards_active && sample.battery_power_w < -self.export_threshold_w {
            return SafetyVerdict::PauseAll {
                cause: PauseCause::GridRewards,
                reason: format!(
                    "grid_rewards_active_battery_exporting (battery {:.0} W)",
                    sample.battery_power_w
                ),
            };
        }

        let cooldown = cooldowns.active(now);
        let reason = if cooldown.is_empty() {
            "all_clear".to_string()
        } else {
            format!(
                "all_clear, obc_cooldown: {}",
                cooldown.iter().cloned().collect::<Vec<_>>().join(",")
            )
        };
        SafetyVerdict::Normal { cooldown, reason }
    }
}
