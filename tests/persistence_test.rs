use smartev::config::{Config, VehicleConfig};
use smartev::coordinator::{ControlCommand, Overrides};
use smartev::persistence::{PersistenceManager, PersistentState};

#[test]
fn default_state_has_no_overrides() {
    let s = PersistentState::default();
    assert_eq!(s.overrides, Overrides::default());
    assert!(s.saved_at.is_none());
    assert!(!s.overrides.pause_all);
}

#[test]
fn applied_commands_survive_a_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json").to_string_lossy().to_string();
    let config = Config {
        vehicles: vec![VehicleConfig {
            id: "tesla".into(),
            charger: smartev::config::ChargerBinding {
                status_entity: "sensor.tesla_status".into(),
                ..Default::default()
            },
            ..Default::default()
        }],
        ..Default::default()
    };

    let mut overrides = Overrides::default();
    for command in [
        ControlCommand::SetPowerLimit(9.0),
        ControlCommand::SetTargetSoc {
            vehicle_id: "tesla".into(),
            pct: 95,
        },
        ControlCommand::SetForceCharge {
            vehicle_id: "tesla".into(),
            enabled: true,
        },
        ControlCommand::SetPauseAll(true),
    ] {
        overrides.apply(&command, &config).unwrap();
    }

    let mut mgr = PersistenceManager::new(&path);
    mgr.set_overrides(overrides.clone());
    mgr.save().unwrap();

    let mut reloaded = PersistenceManager::new(&path);
    reloaded.load().unwrap();
    assert_eq!(reloaded.overrides(), &overrides);
    assert_eq!(reloaded.overrides().power_limit_kw(&config), 9.0);
    assert_eq!(reloaded.overrides().target_soc_pct(&config.vehicles[0]), 95);
    assert_eq!(reloaded.overrides().force_charge_override("tesla"), Some(true));
    assert!(reloaded.state().saved_at.is_some());
}

#[test]
fn older_files_without_new_fields_still_load() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    std::fs::write(&path, r#"{"overrides": {"pause_all": true}}"#).unwrap();

    let mut mgr = PersistenceManager::new(&path.to_string_lossy());
    mgr.load().unwrap();
    assert!(mgr.overrides().pause_all);
    assert!(mgr.overrides().power_limit_kw.is_none());
    assert!(mgr.overrides().assignments.is_empty());
}
