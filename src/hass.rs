//! Home Assistant adapters for the collaborator traits
//!
//! Sensors, prices and vehicle state are read from the REST states API;
//! charger limits go out as Easee service calls. All four adapters share
//! one authenticated client.

use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::{Result, SmartEvError};

mod charger;
mod client;
mod sensors;

pub use charger::{HassChargerControl, dynamic_limit_payload};
pub use client::{EntityState, HassClient};
pub use sensors::{
    HassPriceSource, HassSiteSensors, HassVehicleSensors, is_connected, parse_departure,
    parse_price_points, price_context,
};

/// Build all collaborators against the configured Home Assistant instance
pub fn collaborators(config: &Config) -> Result<Collaborators> {
    let tz: chrono_tz::Tz = config.timezone.parse().map_err(|_| {
        SmartEvError::validation("timezone", format!("Unknown timezone '{}'", config.timezone))
    })?;
    let timeout = Duration::try_from_secs_f64(config.controls.command_timeout_seconds)
        .unwrap_or(Duration::from_secs(5));
    let client = HassClient::new(&config.home_assistant, timeout)?;

    Ok(Collaborators {
        site: Arc::new(HassSiteSensors::new(client.clone(), config.site.clone())),
        prices: Arc::new(HassPriceSource::new(
            client.clone(),
            config.site.price_sensor.clone(),
            config.economics.clone(),
            tz,
        )),
        vehicles: Arc::new(HassVehicleSensors::new(client.clone(), tz)),
        chargers: Arc::new(HassChargerControl::new(
            client,
            &config.home_assistant.charger_domain,
        )),
    })
}
