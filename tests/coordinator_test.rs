use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use smartev::collaborators::{
    ChargerControl, Collaborators, PriceSource, SiteSensors, VehicleSensors,
};
use smartev::config::{ChargerBinding, Config, VehicleConfig};
use smartev::coordinator::{ControlCommand, Coordinator, CoordinatorHandle};
use smartev::error::{Result, SmartEvError};
use smartev::model::{Phases, PriceContext, SiteSample, VehicleAllocation, VehicleReading};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct FakeSite {
    sample: Mutex<Option<SiteSample>>,
    rewards: AtomicBool,
    /// Reads that time out before the sample comes through
    transient_failures: AtomicU32,
    reads: AtomicU32,
}

#[async_trait]
impl SiteSensors for FakeSite {
    async fn read_site_sample(&self) -> Result<SiteSample> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SmartEvError::timeout("grid sensor read timed out"));
        }
        self.sample
            .lock()
            .unwrap()
            .ok_or_else(|| SmartEvError::sensor_unavailable("sensor.grid_power", "unavailable"))
    }

    async fn grid_rewards_active(&self) -> Result<bool> {
        Ok(self.rewards.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct FakePrices {
    context: Mutex<Option<PriceContext>>,
}

#[async_trait]
impl PriceSource for FakePrices {
    async fn read_price_context(&self, _now: DateTime<Utc>) -> Result<PriceContext> {
        self.context
            .lock()
            .unwrap()
            .ok_or_else(|| SmartEvError::sensor_unavailable("sensor.nordpool", "unavailable"))
    }
}

/// Vehicles not listed are connected at 50 %; `None` makes the read fail
#[derive(Default)]
struct FakeVehicles {
    readings: Mutex<BTreeMap<String, Option<VehicleReading>>>,
}

impl FakeVehicles {
    fn set(&self, id: &str, reading: Option<VehicleReading>) {
        self.readings.lock().unwrap().insert(id.to_string(), reading);
    }
}

#[async_trait]
impl VehicleSensors for FakeVehicles {
    async fn read_vehicle_state(&self, vehicle: &VehicleConfig) -> Result<VehicleReading> {
        match self.readings.lock().unwrap().get(&vehicle.id) {
            Some(Some(reading)) => Ok(*reading),
            Some(None) => Err(SmartEvError::sensor_unavailable(
                &vehicle.charger.status_entity,
                "unavailable",
            )),
            None => Ok(VehicleReading {
                connected: true,
                current_soc_pct: Some(50.0),
                ..Default::default()
            }),
        }
    }
}

#[derive(Default)]
struct FakeChargers {
    sent: Mutex<Vec<(String, VehicleAllocation)>>,
    failing: Mutex<BTreeSet<String>>,
}

impl FakeChargers {
    fn sent(&self) -> Vec<(String, VehicleAllocation)> {
        self.sent.lock().unwrap().clone()
    }

    fn set_failing(&self, id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }
}

#[async_trait]
impl ChargerControl for FakeChargers {
    async fn send_charger_limit(
        &self,
        vehicle: &VehicleConfig,
        amps: u32,
        phases: Phases,
    ) -> Result<()> {
        if self.failing.lock().unwrap().contains(&vehicle.id) {
            return Err(SmartEvError::api("400 rejected"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((vehicle.id.clone(), VehicleAllocation { amps, phases }));
        Ok(())
    }
}

struct Harness {
    coordinator: Coordinator,
    handle: CoordinatorHandle,
    site: Arc<FakeSite>,
    prices: Arc<FakePrices>,
    vehicles: Arc<FakeVehicles>,
    chargers: Arc<FakeChargers>,
    config: Config,
    _dir: TempDir,
}

fn vehicle(id: &str, priority: u32) -> VehicleConfig {
    VehicleConfig {
        id: id.to_string(),
        name: id.to_string(),
        priority,
        charger: ChargerBinding {
            status_entity: format!("sensor.{}_charger_status", id),
            charger_id: format!("EH{}", priority),
            circuit_id: format!("{}", 100 + priority),
        },
        ..Default::default()
    }
}

fn config(ids: &[&str]) -> Config {
    let mut config = Config {
        vehicles: ids
            .iter()
            .enumerate()
            .map(|(i, id)| vehicle(id, u32::try_from(i).unwrap() + 1))
            .collect(),
        ..Default::default()
    };
    config.controls.max_retries = 0;
    config.controls.retry_delay_seconds = 0.01;
    config.controls.command_timeout_seconds = 1.0;
    config
}

fn harness(mut config: Config) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    config.state_file = dir.path().join("state.json").to_string_lossy().to_string();

    let site = Arc::new(FakeSite::default());
    let prices = Arc::new(FakePrices::default());
    let vehicles = Arc::new(FakeVehicles::default());
    let chargers = Arc::new(FakeChargers::default());
    let collaborators = Collaborators {
        site: site.clone(),
        prices: prices.clone(),
        vehicles: vehicles.clone(),
        chargers: chargers.clone(),
    };
    let (coordinator, handle) = Coordinator::new(config.clone(), collaborators).unwrap();
    Harness {
        coordinator,
        handle,
        site,
        prices,
        vehicles,
        chargers,
        config,
        _dir: dir,
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, h, m, s).unwrap()
}

fn set_sample(h: &Harness, grid_power_w: f64, battery_power_w: f64) {
    *h.site.sample.lock().unwrap() = Some(SiteSample {
        grid_power_w,
        solar_power_w: 0.0,
        battery_power_w,
        battery_soc_pct: 50.0,
        timestamp: at(12, 0, 0),
    });
}

fn amps(h: &Harness, id: &str) -> u32 {
    h.coordinator
        .state()
        .last_result
        .as_ref()
        .and_then(|r| r.get(id))
        .map_or(0, |a| a.amps)
}

#[tokio::test]
async fn safe_mode_caps_every_connected_vehicle() {
    let mut h = harness(config(&["tesla", "ioniq", "zoe"]));
    h.vehicles.set(
        "zoe",
        Some(VehicleReading {
            connected: false,
            ..Default::default()
        }),
    );

    let report = h.coordinator.run_once(at(12, 0, 0)).await;

    assert!(report.result.safe_mode);
    assert!(report.result.decision_reason.starts_with("grid_meter_unavailable_safe_mode"));
    assert_eq!(amps(&h, "tesla"), 6);
    assert_eq!(amps(&h, "ioniq"), 6);
    assert_eq!(amps(&h, "zoe"), 0);

    let sent: Vec<String> = h.chargers.sent().into_iter().map(|(id, _)| id).collect();
    assert_eq!(sent, vec!["tesla", "ioniq"]);
    assert!(h.handle.snapshot().safe_mode);
}

#[tokio::test]
async fn transient_site_failure_is_retried_within_the_cycle() {
    let mut cfg = config(&["tesla"]);
    cfg.controls.max_retries = 2;
    let mut h = harness(cfg);
    set_sample(&h, 1000.0, 0.0);
    h.site.transient_failures.store(1, Ordering::SeqCst);

    let report = h.coordinator.run_once(at(12, 0, 0)).await;

    assert!(!report.result.safe_mode);
    assert_eq!(h.site.reads.load(Ordering::SeqCst), 2);
    assert!(amps(&h, "tesla") > 0);
}

#[tokio::test]
async fn site_failures_beyond_the_retry_budget_enter_safe_mode() {
    let mut cfg = config(&["tesla"]);
    cfg.controls.max_retries = 1;
    let mut h = harness(cfg);
    set_sample(&h, 1000.0, 0.0);
    h.site.transient_failures.store(5, Ordering::SeqCst);

    let report = h.coordinator.run_once(at(12, 0, 0)).await;

    assert!(report.result.safe_mode);
    assert_eq!(h.site.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn grid_rewards_pause_needs_battery_export_beyond_threshold() {
    let mut cfg = config(&["tesla"]);
    cfg.controls.export_threshold_w = 500.0;
    let mut h = harness(cfg);
    h.site.rewards.store(true, Ordering::SeqCst);

    set_sample(&h, 0.0, -600.0);
    let paused = h.coordinator.run_once(at(12, 0, 0)).await;
    assert!(paused.result.decision_reason.starts_with("grid_rewards_active_battery_exporting"));
    assert_eq!(amps(&h, "tesla"), 0);

    set_sample(&h, 0.0, -400.0);
    let normal = h.coordinator.run_once(at(12, 0, 10)).await;
    assert!(normal.result.decision_reason.contains("price_data_unavailable"));
    assert!(amps(&h, "tesla") > 0);
    assert!(h.handle.snapshot().grid_rewards_active);
}

#[tokio::test]
async fn identical_inputs_give_identical_decisions() {
    let mut h = harness(config(&["tesla", "ioniq"]));
    set_sample(&h, 1500.0, 0.0);

    let first = h.coordinator.run_once(at(12, 10, 0)).await;
    let second = h.coordinator.run_once(at(12, 10, 0)).await;

    assert_eq!(first.result, second.result);
    // Unchanged limits are not resent
    assert_eq!(h.chargers.sent().len(), 2);
}

#[tokio::test]
async fn hour_boundary_resets_the_accumulator() {
    let mut h = harness(config(&["tesla"]));
    set_sample(&h, 25_000.0, 0.0);

    h.coordinator.run_once(at(10, 30, 0)).await;
    h.coordinator.run_once(at(10, 59, 59)).await;
    // 25 kW for half an hour exhausts an 11 kW hour
    assert_eq!(amps(&h, "tesla"), 0);

    h.coordinator.run_once(at(11, 0, 1)).await;
    let tracker = &h.coordinator.state().tracker;
    assert_eq!(tracker.hour_start(), Some(at(11, 0, 0)));
    assert!(tracker.energy_wh_so_far() < 10.0);
    assert_eq!(amps(&h, "tesla"), 15);
}

#[tokio::test]
async fn failed_command_keeps_previous_allocation() {
    let mut h = harness(config(&["tesla"]));
    set_sample(&h, 0.0, 0.0);

    h.coordinator.run_once(at(12, 0, 0)).await;
    assert_eq!(amps(&h, "tesla"), 15);

    h.chargers.set_failing("tesla", true);
    assert!(h.coordinator.handle_command(ControlCommand::SetPowerLimit(5.0)));
    h.coordinator.run_once(at(12, 0, 30)).await;

    assert_eq!(amps(&h, "tesla"), 15);
    let snapshot = h.handle.snapshot();
    assert!(snapshot.vehicles["tesla"].command_failed);
    assert_eq!(snapshot.vehicles["tesla"].allocated_amps, 15);
    assert_eq!(snapshot.command_failures, 1);
    assert_eq!(h.coordinator.state().counters.command_failures, 1);
}

#[tokio::test]
async fn failed_phase_switch_is_rolled_back() {
    let mut cfg = config(&["tesla"]);
    cfg.limits.power_limit_kw = 3.0;
    let mut h = harness(cfg);
    set_sample(&h, 0.0, 0.0);

    h.chargers.set_failing("tesla", true);
    let report = h.coordinator.run_once(at(12, 0, 0)).await;
    assert!(report.phase_changed("tesla"));

    let state = h.coordinator.state();
    assert_eq!(state.phases["tesla"], Phases::Three);
    assert!(!state.cooldowns.is_active("tesla", at(12, 0, 0)));
    assert_eq!(
        state.last_result.as_ref().unwrap().get("tesla"),
        Some(&VehicleAllocation::off(Phases::Three))
    );

    h.chargers.set_failing("tesla", false);
    h.coordinator.run_once(at(12, 0, 10)).await;
    let state = h.coordinator.state();
    assert_eq!(state.phases["tesla"], Phases::One);
    assert!(state.cooldowns.is_active("tesla", at(12, 0, 10)));
    assert_eq!(
        h.chargers.sent(),
        vec![(
            "tesla".to_string(),
            VehicleAllocation {
                amps: 13,
                phases: Phases::One
            }
        )]
    );
}

#[tokio::test]
async fn unreadable_vehicle_is_held() {
    let mut h = harness(config(&["tesla"]));
    set_sample(&h, 0.0, 0.0);

    h.coordinator.run_once(at(12, 0, 0)).await;
    h.vehicles.set("tesla", None);
    let report = h.coordinator.run_once(at(12, 0, 30)).await;

    assert_eq!(amps(&h, "tesla"), 15);
    assert!(report.result.decision_reason.ends_with("held: tesla"));
    assert!(h.handle.snapshot().vehicles["tesla"].held);
    assert_eq!(h.chargers.sent().len(), 1);
}

#[tokio::test]
async fn export_beats_night_unless_forced() {
    let mut h = harness(config(&["tesla"]));
    set_sample(&h, 0.0, 0.0);
    *h.prices.context.lock().unwrap() = Some(PriceContext {
        spot_price: 1.0,
        cheapest_night_spot: Some(0.3),
        export_compensation: 0.1,
        grid_fee_import: 0.2,
        grid_fee_export: 0.05,
        vat_rate: 0.25,
    });

    let deferred = h.coordinator.run_once(at(12, 0, 0)).await;
    assert!(deferred.result.decision_reason.contains("export_more_profitable"));
    assert_eq!(amps(&h, "tesla"), 0);
    let snapshot = h.handle.snapshot();
    assert!((snapshot.export_revenue.unwrap() - 1.05).abs() < 1e-9);
    assert!((snapshot.night_charge_cost.unwrap() - 0.625).abs() < 1e-9);

    assert!(h.coordinator.handle_command(ControlCommand::SetForceCharge {
        vehicle_id: "tesla".into(),
        enabled: true,
    }));
    let forced = h.coordinator.run_once(at(12, 0, 30)).await;
    assert!(forced.result.decision_reason.starts_with("force_charge"));
    assert!(amps(&h, "tesla") > 0);
}

#[tokio::test]
async fn runtime_override_switches_off_entity_force_charge() {
    let mut h = harness(config(&["tesla"]));
    set_sample(&h, 0.0, 0.0);
    *h.prices.context.lock().unwrap() = Some(PriceContext {
        spot_price: 1.0,
        cheapest_night_spot: Some(0.3),
        export_compensation: 0.1,
        grid_fee_import: 0.2,
        grid_fee_export: 0.05,
        vat_rate: 0.25,
    });
    h.vehicles.set(
        "tesla",
        Some(VehicleReading {
            connected: true,
            current_soc_pct: Some(50.0),
            force_charge: true,
            ..Default::default()
        }),
    );

    h.coordinator.run_once(at(12, 0, 0)).await;
    assert!(amps(&h, "tesla") > 0);

    assert!(h.coordinator.handle_command(ControlCommand::SetForceCharge {
        vehicle_id: "tesla".into(),
        enabled: false,
    }));
    let deferred = h.coordinator.run_once(at(12, 0, 30)).await;
    assert!(deferred.result.decision_reason.contains("export_more_profitable"));
    assert_eq!(amps(&h, "tesla"), 0);
    assert!(!h.handle.snapshot().vehicles["tesla"].force_charge);
}

#[tokio::test]
async fn manual_pause_is_persisted() {
    let mut h = harness(config(&["tesla"]));
    set_sample(&h, 0.0, 0.0);

    assert!(h.coordinator.handle_command(ControlCommand::SetPauseAll(true)));
    let report = h.coordinator.run_once(at(12, 0, 0)).await;
    assert_eq!(report.result.decision_reason, "manual_pause");
    assert_eq!(amps(&h, "tesla"), 0);
    assert!(h.handle.snapshot().paused);

    let collaborators = Collaborators {
        site: h.site.clone(),
        prices: h.prices.clone(),
        vehicles: h.vehicles.clone(),
        chargers: h.chargers.clone(),
    };
    let (restarted, _handle) = Coordinator::new(h.config.clone(), collaborators).unwrap();
    assert!(restarted.state().overrides.pause_all);
}

#[tokio::test]
async fn invalid_commands_are_ignored() {
    let mut h = harness(config(&["tesla"]));
    assert!(!h.coordinator.handle_command(ControlCommand::SetPowerLimit(-2.0)));
    assert!(!h.coordinator.handle_command(ControlCommand::SetTargetSoc {
        vehicle_id: "unknown".into(),
        pct: 50,
    }));
    assert_eq!(h.coordinator.state().overrides.power_limit_kw, None);
}

#[tokio::test]
async fn invalid_configuration_never_starts() {
    let mut cfg = config(&["tesla", "tesla"]);
    cfg.state_file = String::new();
    let collaborators = Collaborators {
        site: Arc::new(FakeSite::default()),
        prices: Arc::new(FakePrices::default()),
        vehicles: Arc::new(FakeVehicles::default()),
        chargers: Arc::new(FakeChargers::default()),
    };
    assert!(Coordinator::new(cfg, collaborators).is_err());
}

#[tokio::test]
async fn run_loop_publishes_and_stops() {
    let mut cfg = config(&["tesla"]);
    cfg.controls.poll_interval_seconds = 1;
    let h = harness(cfg);
    set_sample(&h, 0.0, 0.0);

    let Harness {
        mut coordinator,
        handle,
        _dir,
        ..
    } = h;
    let mut updates = handle.subscribe();
    let task = tokio::spawn(async move { coordinator.run().await });

    handle.send(ControlCommand::RunNow).unwrap();
    tokio::time::timeout(Duration::from_secs(5), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(handle.snapshot().total_cycles >= 1);

    handle.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
