use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior, interval};

use super::commands::resolve_shared_chargers;
use super::dispatch::{CommandOutcome, RetryPolicy, needs_send, read_with_retry, send_with_retry};
use super::pipeline::{CycleInputs, CycleReport, PipelineSettings, run_cycle};
use super::snapshot::DecisionSnapshot;
use super::state::{CoordinatorState, SentCommand};
use super::{Coordinator, CoordinatorHandle};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::Result;
use crate::logging::get_logger;
use crate::model::VehicleState;
use crate::persistence::PersistenceManager;

impl Coordinator {
    /// Validate configuration, restore persisted overrides and wire channels.
    ///
    /// An invalid configuration is returned as an error and no pipeline is built.
    pub fn new(config: Config, collaborators: Collaborators) -> Result<(Self, CoordinatorHandle)> {
        config.validate()?;
        let logger = get_logger("coordinator");

        let mut persistence = PersistenceManager::new(&config.state_file);
        if let Err(e) = persistence.load() {
            logger.warn(&format!("Ignoring unreadable state file: {}", e));
        }
        let mut overrides = persistence.overrides().clone();
        overrides.retain_configured(&config);

        let state = CoordinatorState::new(&config, overrides);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(DecisionSnapshot::initial(&config, &state)));

        logger.info(&format!(
            "Coordinator ready: {} vehicle(s), limit {:.1} kW, interval {}s",
            config.vehicles.len(),
            state.overrides.power_limit_kw(&config),
            config.controls.poll_interval_seconds
        ));

        let coordinator = Self {
            settings: PipelineSettings::from_config(&config),
            retry: RetryPolicy::from_controls(&config.controls),
            config,
            state,
            collaborators,
            persistence,
            logger,
            commands_rx,
            shutdown_rx,
            snapshot_tx,
        };
        let handle = CoordinatorHandle {
            commands_tx,
            shutdown_tx,
            snapshot_rx,
        };
        Ok((coordinator, handle))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    /// Main loop: one cycle per tick, commands in between.
    ///
    /// Cycles never overlap; a tick missed while a cycle overran is skipped.
    /// Returns once shutdown is requested or every handle is dropped, after
    /// the cycle in flight (including its charger commands) has finished.
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting decision loop");
        let period = Duration::from_secs(self.config.controls.poll_interval_seconds.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once(Utc::now()).await;
                }
                Some(cmd) = self.commands_rx.recv() => {
                    if self.handle_command(cmd) {
                        self.run_once(Utc::now()).await;
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.persistence.set_overrides(self.state.overrides.clone());
        if let Err(e) = self.persistence.save() {
            self.logger
                .warn(&format!("Failed to persist overrides on shutdown: {}", e));
        }
        self.logger.info("Decision loop stopped");
        Ok(())
    }

    /// Read collaborators, decide, dispatch and publish one cycle at `now`
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> CycleReport {
        let started = std::time::Instant::now();
        let previous_reason = self
            .state
            .last_result
            .as_ref()
            .map(|r| r.decision_reason.clone());

        let inputs = self.gather_inputs(now).await;
        let report = run_cycle(&mut self.state, &self.settings, &inputs, now);
        let failed = self.dispatch(&report, &inputs.vehicles, now).await;

        let elapsed = started.elapsed();
        self.state.counters.total = self.state.counters.total.saturating_add(1);
        if elapsed > Duration::from_secs(self.config.controls.poll_interval_seconds) {
            self.state.counters.overruns = self.state.counters.overruns.saturating_add(1);
            self.logger
                .warn(&format!("Cycle overran the poll interval: {:?}", elapsed));
        }

        let reason = &report.result.decision_reason;
        if previous_reason.as_deref() != Some(reason.as_str()) {
            self.logger.info(&format!(
                "Decision: {} (allocated {:.0} W)",
                reason,
                report.result.total_power_w(self.config.controls.voltage)
            ));
        } else {
            self.logger.debug(&format!("Decision unchanged: {}", reason));
        }

        let snapshot = DecisionSnapshot::from_cycle(
            &report,
            &self.state,
            &inputs.vehicles,
            inputs.grid_rewards_active,
            &inputs.held,
            &failed,
            u64::try_from(elapsed.as_millis()).ok(),
        );
        self.snapshot_tx.send_replace(Arc::new(snapshot));
        report
    }

    async fn gather_inputs(&mut self, now: DateTime<Utc>) -> CycleInputs {
        let retry = self.retry;
        let collaborators = self.collaborators.clone();

        let sample = match read_with_retry(&retry, "site sample", || collaborators.site.read_site_sample()).await {
            Ok(sample) if sample.grid_power_w.is_finite() => Some(sample),
            Ok(_) => {
                self.logger.warn("Grid power reading is not a number");
                None
            }
            Err(e) => {
                self.logger.warn(&format!("Site sample unavailable: {}", e));
                None
            }
        };

        let grid_rewards_active = if sample.is_some() {
            match read_with_retry(&retry, "grid rewards", || collaborators.site.grid_rewards_active()).await {
                Ok(active) => active,
                Err(e) => {
                    self.logger
                        .warn(&format!("Grid Rewards state unavailable, assuming inactive: {}", e));
                    false
                }
            }
        } else {
            false
        };

        let prices = match read_with_retry(&retry, "price context", || {
            collaborators.prices.read_price_context(now)
        })
        .await
        {
            Ok(prices) => Some(prices),
            Err(e) => {
                self.logger.warn(&format!("Price data unavailable: {}", e));
                None
            }
        };

        let mut vehicles: Vec<VehicleState> = Vec::with_capacity(self.config.vehicles.len());
        let mut held = BTreeSet::new();
        for vehicle in &self.config.vehicles {
            let reading = match read_with_retry(&retry, "vehicle state", || {
                collaborators.vehicles.read_vehicle_state(vehicle)
            })
            .await
            {
                Ok(reading) => {
                    self.state.readings.insert(vehicle.id.clone(), reading);
                    reading
                }
                Err(e) => {
                    self.logger
                        .for_vehicle(&vehicle.id)
                        .warn(&format!("Vehicle state unavailable, holding: {}", e));
                    held.insert(vehicle.id.clone());
                    self.state
                        .readings
                        .get(&vehicle.id)
                        .copied()
                        .unwrap_or_default()
                }
            };
            vehicles.push(self.state.overrides.vehicle_state(vehicle, &reading));
        }
        resolve_shared_chargers(
            &mut vehicles,
            &self.config.vehicles,
            &self.state.overrides.assignments,
        );

        CycleInputs {
            sample,
            grid_rewards_active,
            prices,
            vehicles,
            held,
        }
    }

    /// Send changed limits to connected vehicles; returns the vehicles whose command failed
    async fn dispatch(
        &mut self,
        report: &CycleReport,
        vehicles: &[VehicleState],
        now: DateTime<Utc>,
    ) -> BTreeSet<String> {
        let refresh = chrono::Duration::seconds(
            i64::try_from(self.config.controls.command_refresh_seconds).unwrap_or(i64::MAX / 1000),
        );
        let mut failed = BTreeSet::new();

        for vehicle in vehicles {
            let Some(vehicle_config) = self.config.vehicle(&vehicle.id) else {
                continue;
            };
            if !vehicle.connected {
                // Force a fresh command once the vehicle is back
                self.state.last_sent.remove(&vehicle.id);
                continue;
            }
            let Some(target) = report.result.get(&vehicle.id).copied() else {
                continue;
            };
            if !needs_send(self.state.last_sent.get(&vehicle.id), target, now, refresh) {
                continue;
            }

            let logger = self.logger.for_vehicle(&vehicle.id);
            match send_with_retry(
                self.collaborators.chargers.as_ref(),
                vehicle_config,
                target,
                &self.retry,
            )
            .await
            {
                CommandOutcome::Applied => {
                    logger.debug(&format!(
                        "Charger limit applied: {} A on {} phase(s)",
                        target.amps,
                        target.phases.count()
                    ));
                    self.state.last_sent.insert(
                        vehicle.id.clone(),
                        SentCommand {
                            allocation: target,
                            sent_at: now,
                        },
                    );
                }
                CommandOutcome::Retryable(e) | CommandOutcome::Terminal(e) => {
                    logger.warn(&format!(
                        "Charger command failed, keeping previous state: {}",
                        e
                    ));
                    self.state.counters.command_failures =
                        self.state.counters.command_failures.saturating_add(1);
                    let previous = report
                        .previous_phases
                        .get(&vehicle.id)
                        .copied()
                        .unwrap_or(target.phases);
                    self.state.rollback_vehicle(
                        &vehicle.id,
                        previous,
                        report.phase_changed(&vehicle.id),
                    );
                    failed.insert(vehicle.id.clone());
                }
            }
        }
        failed
    }
}
