//! Data model shared by the decision pipeline
//!
//! Measurements and prices arrive from collaborators already resolved to
//! numbers; everything here is plain data with no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::VehicleConfig;

/// Number of phases a charger delivers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phases {
    One,
    #[default]
    Three,
}

impl Phases {
    pub const fn count(self) -> u8 {
        match self {
            Phases::One => 1,
            Phases::Three => 3,
        }
    }

    /// Power drawn at `amps` per phase and nominal `voltage`
    pub fn power_w(self, amps: u32, voltage: f64) -> f64 {
        f64::from(amps) * voltage * f64::from(self.count())
    }

    /// Whole amps per phase that fit inside `power_w`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn amps_for_power(self, power_w: f64, voltage: f64) -> u32 {
        if power_w <= 0.0 || voltage <= 0.0 {
            return 0;
        }
        let amps = (power_w / (voltage * f64::from(self.count()))).floor();
        if amps >= f64::from(u32::MAX) { u32::MAX } else { amps as u32 }
    }
}

impl TryFrom<u8> for Phases {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phases::One),
            3 => Ok(Phases::Three),
            other => Err(format!("phases must be 1 or 3, got {}", other)),
        }
    }
}

impl From<Phases> for u8 {
    fn from(p: Phases) -> Self {
        p.count()
    }
}

/// One reading of the site meters, captured once per cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteSample {
    /// Import positive, export negative
    pub grid_power_w: f64,
    pub solar_power_w: f64,
    /// Negative = battery exporting to the grid
    pub battery_power_w: f64,
    pub battery_soc_pct: f64,
    pub timestamp: DateTime<Utc>,
}

/// Hourly price point as published by the price sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub start: DateTime<Utc>,
    pub price: f64,
}

/// Prices for the current cycle, currency per kWh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PriceContext {
    pub spot_price: f64,
    /// Absent until tomorrow's prices are published
    pub cheapest_night_spot: Option<f64>,
    pub export_compensation: f64,
    pub grid_fee_import: f64,
    pub grid_fee_export: f64,
    pub vat_rate: f64,
}

/// Runtime fields reported for a vehicle each cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct VehicleReading {
    pub connected: bool,
    pub current_soc_pct: Option<f64>,
    pub force_charge: bool,
    pub departure_time: Option<DateTime<Utc>>,
}

/// A configured vehicle merged with this cycle's readings and overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub id: String,
    pub name: String,
    pub priority: u32,
    pub target_soc_pct: u8,
    pub current_soc_pct: Option<f64>,
    pub departure_time: Option<DateTime<Utc>>,
    pub force_charge: bool,
    pub connected: bool,
    pub max_amps: u32,
    /// Highest phase count the vehicle and charger support
    pub phases: Phases,
}

impl VehicleState {
    /// Build from configuration and a reading
    pub fn from_reading(config: &VehicleConfig, reading: &VehicleReading) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            priority: config.priority,
            target_soc_pct: config.target_soc_pct,
            current_soc_pct: reading.current_soc_pct,
            departure_time: reading.departure_time,
            force_charge: reading.force_charge,
            connected: reading.connected,
            max_amps: config.max_amps,
            phases: config.phases,
        }
    }

    /// Whether the vehicle is still below its target. Unknown SoC counts as needing charge.
    pub fn needs_charge(&self) -> bool {
        match self.current_soc_pct {
            Some(soc) => soc < f64::from(self.target_soc_pct),
            None => true,
        }
    }
}

/// Current and phase assignment for one vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleAllocation {
    pub amps: u32,
    pub phases: Phases,
}

impl VehicleAllocation {
    pub const fn off(phases: Phases) -> Self {
        Self { amps: 0, phases }
    }

    pub const fn is_charging(&self) -> bool {
        self.amps > 0
    }

    pub fn power_w(&self, voltage: f64) -> f64 {
        self.phases.power_w(self.amps, voltage)
    }
}

/// Outcome of one pipeline run. Always recomputed in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AllocationResult {
    pub allocations: BTreeMap<String, VehicleAllocation>,
    pub decision_reason: String,
    pub safe_mode: bool,
}

impl AllocationResult {
    pub fn get(&self, vehicle_id: &str) -> Option<&VehicleAllocation> {
        self.allocations.get(vehicle_id)
    }

    /// Total allocated power across all vehicles
    pub fn total_power_w(&self, voltage: f64) -> f64 {
        self.allocations.values().map(|a| a.power_w(voltage)).sum()
    }
}
