#![cfg(test)]

use super::config::*;
use crate::model::Phases;

fn vehicle(id: &str, priority: u32) -> VehicleConfig {
    VehicleConfig {
        id: id.to_string(),
        name: id.to_uppercase(),
        priority,
        charger: ChargerBinding {
            status_entity: format!("sensor.{}_charger_status", id),
            charger_id: format!("EH{}", id),
            circuit_id: "1".to_string(),
        },
        ..Default::default()
    }
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.limits.power_limit_kw, 11.0);
    assert_eq!(config.controls.poll_interval_seconds, 30);
    assert_eq!(config.controls.obc_cooldown_seconds, 30);
    assert_eq!(config.controls.safe_mode_amps, 6);
    assert_eq!(config.economics.vat_rate, 0.25);
    assert!(config.vehicles.is_empty());
}

#[test]
fn test_config_validation() {
    let mut config = Config::default();
    config.vehicles = vec![vehicle("tesla", 1), vehicle("ioniq", 2)];
    assert!(config.validate().is_ok());

    config.limits.power_limit_kw = 0.0;
    assert!(config.validate().is_err());

    config = Config::default();
    config.site.grid_sensor = String::new();
    assert!(config.validate().is_err());

    config = Config::default();
    config.vehicles = vec![vehicle("tesla", 0)];
    assert!(config.validate().is_err());

    config = Config::default();
    config.vehicles = vec![vehicle("tesla", 1), vehicle("tesla", 2)];
    assert!(config.validate().is_err());

    config = Config::default();
    config.timezone = "Mars/Olympus".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_safe_mode_current_below_minimum_rejected() {
    let mut config = Config::default();
    config.vehicles = vec![vehicle("tesla", 1)];

    config.controls.safe_mode_amps = 3;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("controls.safe_mode_amps"), "{}", err);

    config.controls.safe_mode_amps = 0;
    assert!(config.validate().is_err());

    config.controls.min_charging_amps = 8;
    config.controls.safe_mode_amps = 8;
    assert!(config.validate().is_ok());
}

#[test]
fn test_vehicle_max_amps_below_minimum_rejected() {
    let mut config = Config::default();
    let mut v = vehicle("tesla", 1);
    v.max_amps = 4;
    config.vehicles = vec![v];
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("vehicles[0].max_amps"));
}

#[test]
fn test_config_serialization() {
    let mut config = Config::default();
    config.vehicles = vec![vehicle("tesla", 1)];
    let yaml = serde_yaml::to_string(&config).unwrap();
    let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(config.limits.power_limit_kw, deserialized.limits.power_limit_kw);
    assert_eq!(config.vehicles, deserialized.vehicles);
}

#[test]
fn test_partial_yaml_uses_defaults() {
    let yaml = r#"
site:
  grid_sensor: sensor.p1_power
vehicles:
  - id: ioniq
    name: Ioniq 5
    phases: 1
    charger:
      status_entity: sensor.easee_status
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.site.grid_sensor, "sensor.p1_power");
    assert_eq!(config.limits.power_limit_kw, 11.0);
    assert_eq!(config.vehicles[0].target_soc_pct, 80);
    assert_eq!(config.vehicles[0].phases, Phases::One);
    assert_eq!(config.vehicles[0].priority, 1);
}
