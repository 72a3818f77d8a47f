//! Configuration management for SmartEV
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. The file location can be overridden with the
//! `SMARTEV_CONFIG` environment variable.

use crate::error::{Result, SmartEvError};
use crate::model::Phases;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Site sensors (Home Assistant entity ids)
    pub site: SiteConfig,

    /// Power ceiling for the calendar-hour average
    pub limits: LimitsConfig,

    /// Tariff and fee parameters for the opportunity cost comparison
    pub economics: EconomicsConfig,

    /// Configured vehicles, one per charger binding
    pub vehicles: Vec<VehicleConfig>,

    /// Control loop and safety tuning
    pub controls: ControlsConfig,

    /// Home Assistant REST API connection
    pub home_assistant: HomeAssistantConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Timezone used for the night price window
    pub timezone: String,

    /// Where runtime overrides are persisted
    pub state_file: String,
}

/// Site-level sensors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Grid import/export power in W (import positive). Required.
    pub grid_sensor: String,

    /// Solar production in W
    pub solar_sensor: Option<String>,

    /// Home battery power in W (negative = exporting)
    pub battery_power_sensor: Option<String>,

    /// Home battery state of charge in %
    pub battery_soc_sensor: Option<String>,

    /// Nordpool-style spot price sensor
    pub price_sensor: Option<String>,

    /// Grid Rewards event indicator
    pub grid_rewards_entity: Option<String>,
}

/// Power limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum calendar-hour average import in kW
    pub power_limit_kw: f64,
}

/// Economic parameters, all in currency per kWh except `vat_rate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicsConfig {
    pub grid_fee_import: f64,
    pub grid_fee_export: f64,
    pub export_compensation: f64,
    /// VAT as a fraction (0.25 = 25 %)
    pub vat_rate: f64,
    /// First local hour of the night price window
    pub night_start_hour: u32,
    /// Local hour at which the night price window ends (exclusive)
    pub night_end_hour: u32,
}

/// Charger binding for a vehicle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ChargerBinding {
    /// Entity reporting the charger status (connected/disconnected/...)
    pub status_entity: String,

    /// Charger id used by service calls
    pub charger_id: String,

    /// Circuit id for dynamic current limits
    pub circuit_id: String,
}

/// Individual vehicle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VehicleConfig {
    /// Stable identifier, also the tie-breaker for equal priorities
    pub id: String,

    /// Display name
    pub name: String,

    /// 1 = served first
    pub priority: u32,

    /// Target state of charge in %
    pub target_soc_pct: u8,

    /// Maximum charging current per phase
    pub max_amps: u32,

    /// Maximum number of phases the vehicle can draw on
    pub phases: Phases,

    /// Charger this vehicle is plugged into
    pub charger: ChargerBinding,

    /// Vehicle state of charge sensor
    pub soc_entity: Option<String>,

    /// Planned departure time (datetime entity)
    pub departure_entity: Option<String>,

    /// Optional input_boolean mirroring the force-charge toggle
    pub force_charge_entity: Option<String>,
}

/// Control loop and safety limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Pipeline interval
    pub poll_interval_seconds: u64,

    /// Cooldown after a phase-count change
    pub obc_cooldown_seconds: u64,

    /// Below this an EV does not start charging; such allocations become 0 A
    pub min_charging_amps: u32,

    /// Fixed per-vehicle cap while the grid meter is unavailable (>= `min_charging_amps`)
    pub safe_mode_amps: u32,

    /// Nominal phase voltage
    pub voltage: f64,

    /// Battery export (W) above which a Grid Rewards event pauses charging
    pub export_threshold_w: f64,

    /// Minimum extra allocated power before switching phase count
    pub phase_switch_min_gain_w: f64,

    /// Timeout for each collaborator call
    pub command_timeout_seconds: f64,

    /// Charger command attempts after the first one
    pub max_retries: u32,

    /// Initial backoff between charger command attempts (doubles per retry)
    pub retry_delay_seconds: f64,

    /// Resend an unchanged limit after this long
    pub command_refresh_seconds: u64,
}

/// Home Assistant connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL, e.g. http://homeassistant.local:8123
    pub url: String,

    /// Long-lived access token
    #[serde(skip_serializing)]
    pub token: String,

    /// Service domain for charger commands
    pub charger_domain: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives daily rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Whether to serve the HTTP API
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `SMARTEV_CONFIG` or the default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os("SMARTEV_CONFIG") {
            return Self::from_file(path);
        }

        let default_paths = [
            "smartev.yaml",
            "/data/smartev.yaml",
            "/etc/smartev/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Look up a configured vehicle by id
    pub fn vehicle(&self, id: &str) -> Option<&VehicleConfig> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.site.grid_sensor.trim().is_empty() {
            return Err(SmartEvError::validation(
                "site.grid_sensor",
                "A grid sensor is required",
            ));
        }

        validate_power_limit(self.limits.power_limit_kw)?;

        if !(0.0..=1.0).contains(&self.economics.vat_rate) {
            return Err(SmartEvError::validation(
                "economics.vat_rate",
                "Must be a fraction between 0 and 1",
            ));
        }
        if self.economics.night_start_hour > 23 || self.economics.night_end_hour > 23 {
            return Err(SmartEvError::validation(
                "economics.night_start_hour",
                "Night window hours must be within 0..=23",
            ));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(SmartEvError::validation(
                "timezone",
                format!("Unknown timezone '{}'", self.timezone),
            ));
        }

        let controls = &self.controls;
        if controls.poll_interval_seconds == 0 {
            return Err(SmartEvError::validation(
                "controls.poll_interval_seconds",
                "Must be greater than 0",
            ));
        }
        if controls.min_charging_amps == 0 {
            return Err(SmartEvError::validation(
                "controls.min_charging_amps",
                "Must be greater than 0",
            ));
        }
        if controls.safe_mode_amps < controls.min_charging_amps {
            return Err(SmartEvError::validation(
                "controls.safe_mode_amps",
                format!(
                    "Must be at least the minimum charging current ({} A)",
                    controls.min_charging_amps
                ),
            ));
        }
        if controls.voltage <= 0.0 {
            return Err(SmartEvError::validation(
                "controls.voltage",
                "Must be positive",
            ));
        }
        if controls.command_timeout_seconds <= 0.0 {
            return Err(SmartEvError::validation(
                "controls.command_timeout_seconds",
                "Must be positive",
            ));
        }

        let mut seen = HashSet::new();
        for (idx, v) in self.vehicles.iter().enumerate() {
            let field = |name: &str| format!("vehicles[{}].{}", idx, name);
            if v.id.trim().is_empty() {
                return Err(SmartEvError::validation(field("id"), "Cannot be empty"));
            }
            if !seen.insert(v.id.as_str()) {
                return Err(SmartEvError::validation(
                    field("id"),
                    format!("Duplicate vehicle id '{}'", v.id),
                ));
            }
            if v.priority == 0 {
                return Err(SmartEvError::validation(
                    field("priority"),
                    "Must be a positive integer (1 = served first)",
                ));
            }
            validate_target_soc(v.target_soc_pct)
                .map_err(|_| SmartEvError::validation(field("target_soc_pct"), "Must be 0..=100"))?;
            if v.max_amps < controls.min_charging_amps {
                return Err(SmartEvError::validation(
                    field("max_amps"),
                    format!(
                        "Must be at least the minimum charging current ({} A)",
                        controls.min_charging_amps
                    ),
                ));
            }
            if v.charger.status_entity.trim().is_empty() {
                return Err(SmartEvError::validation(
                    field("charger.status_entity"),
                    "A charger status entity is required",
                ));
            }
        }

        Ok(())
    }
}

/// Runtime check for the power ceiling (also used by the runtime control)
pub fn validate_power_limit(kw: f64) -> Result<()> {
    if !kw.is_finite() || kw <= 0.0 {
        return Err(SmartEvError::validation(
            "limits.power_limit_kw",
            "Must be positive",
        ));
    }
    Ok(())
}

/// Runtime check for a target state of charge
pub fn validate_target_soc(pct: u8) -> Result<()> {
    if pct > 100 {
        return Err(SmartEvError::validation(
            "target_soc_pct",
            "Must be 0..=100",
        ));
    }
    Ok(())
}
