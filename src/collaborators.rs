//! Boundary traits between the decision pipeline and the outside world
//!
//! The coordinator only ever talks to sensors, prices and chargers through
//! these traits. The Home Assistant adapters in [`crate::hass`] implement
//! them for production; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::VehicleConfig;
use crate::error::Result;
use crate::model::{Phases, PriceContext, SiteSample, VehicleReading};

/// Site meters (grid, solar, home battery) and the Grid Rewards indicator
#[async_trait]
pub trait SiteSensors: Send + Sync {
    /// Latest site reading. Failing or stale grid data must return an error.
    async fn read_site_sample(&self) -> Result<SiteSample>;

    /// Whether a Grid Rewards event is in progress
    async fn grid_rewards_active(&self) -> Result<bool>;
}

/// Spot prices and tariff parameters
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn read_price_context(&self, now: DateTime<Utc>) -> Result<PriceContext>;
}

/// Per-vehicle connection, state of charge and force-charge state
#[async_trait]
pub trait VehicleSensors: Send + Sync {
    async fn read_vehicle_state(&self, vehicle: &VehicleConfig) -> Result<VehicleReading>;
}

/// Charger current control. Sending identical values twice must be harmless.
#[async_trait]
pub trait ChargerControl: Send + Sync {
    async fn send_charger_limit(
        &self,
        vehicle: &VehicleConfig,
        amps: u32,
        phases: Phases,
    ) -> Result<()>;
}

/// The full set of collaborators a coordinator needs
#[derive(Clone)]
pub struct Collaborators {
    pub site: Arc<dyn SiteSensors>,
    pub prices: Arc<dyn PriceSource>,
    pub vehicles: Arc<dyn VehicleSensors>,
    pub chargers: Arc<dyn ChargerControl>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
