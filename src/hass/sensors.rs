use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::client::{EntityState, HassClient};
use crate::collaborators::{PriceSource, SiteSensors, VehicleSensors};
use crate::config::{EconomicsConfig, SiteConfig, VehicleConfig};
use crate::economics::{NightWindow, cheapest_night_price};
use crate::error::{Result, SmartEvError};
use crate::logging::{StructuredLogger, get_logger};
use crate::model::{PriceContext, PricePoint, SiteSample, VehicleReading};

/// Charger states meaning no vehicle is plugged in
const NOT_CONNECTED: &[&str] = &["disconnected", "unavailable", "unknown", ""];

/// Grid, solar and battery sensors plus the Grid Rewards indicator
#[derive(Debug, Clone)]
pub struct HassSiteSensors {
    client: HassClient,
    site: SiteConfig,
    logger: StructuredLogger,
}

impl HassSiteSensors {
    pub fn new(client: HassClient, site: SiteConfig) -> Self {
        Self {
            client,
            site,
            logger: get_logger("hass.site"),
        }
    }

    /// Optional sensors fall back to 0 when missing or unavailable
    async fn optional_f64(&self, entity_id: Option<&str>) -> f64 {
        let Some(entity_id) = entity_id else {
            return 0.0;
        };
        match self.client.get_f64(entity_id).await {
            Ok(value) => value,
            Err(e) => {
                self.logger
                    .debug(&format!("Optional sensor {} ignored: {}", entity_id, e));
                0.0
            }
        }
    }
}

#[async_trait]
impl SiteSensors for HassSiteSensors {
    async fn read_site_sample(&self) -> Result<SiteSample> {
        let grid = self.client.get_state(&self.site.grid_sensor).await?;
        let grid_power_w = grid.as_f64()?;

        Ok(SiteSample {
            grid_power_w,
            solar_power_w: self.optional_f64(self.site.solar_sensor.as_deref()).await,
            battery_power_w: self
                .optional_f64(self.site.battery_power_sensor.as_deref())
                .await,
            battery_soc_pct: self
                .optional_f64(self.site.battery_soc_sensor.as_deref())
                .await,
            timestamp: grid.last_updated.unwrap_or_else(Utc::now),
        })
    }

    async fn grid_rewards_active(&self) -> Result<bool> {
        match self.site.grid_rewards_entity.as_deref() {
            Some(entity_id) => Ok(self.client.get_state(entity_id).await?.is_on()),
            None => Ok(false),
        }
    }
}

/// Nordpool-style price sensor combined with the configured tariff
#[derive(Debug, Clone)]
pub struct HassPriceSource {
    client: HassClient,
    price_sensor: Option<String>,
    economics: EconomicsConfig,
    window: NightWindow,
}

impl HassPriceSource {
    pub fn new(
        client: HassClient,
        price_sensor: Option<String>,
        economics: EconomicsConfig,
        tz: Tz,
    ) -> Self {
        let window = NightWindow::new(economics.night_start_hour, economics.night_end_hour, tz);
        Self {
            client,
            price_sensor,
            economics,
            window,
        }
    }
}

#[async_trait]
impl PriceSource for HassPriceSource {
    async fn read_price_context(&self, now: DateTime<Utc>) -> Result<PriceContext> {
        let entity_id = self.price_sensor.as_deref().ok_or_else(|| {
            SmartEvError::sensor_unavailable("site.price_sensor", "no price sensor configured")
        })?;
        let state = self.client.get_state(entity_id).await?;
        price_context(&state, now, &self.window, &self.economics)
    }
}

/// Build a price context from a Nordpool entity: spot price in the state,
/// hourly slots in `raw_today` and `raw_tomorrow`
pub fn price_context(
    state: &EntityState,
    now: DateTime<Utc>,
    window: &NightWindow,
    economics: &EconomicsConfig,
) -> Result<PriceContext> {
    let spot_price = state.as_f64()?;
    let points = parse_price_points(&state.attributes);
    Ok(PriceContext {
        spot_price,
        cheapest_night_spot: cheapest_night_price(&points, now, window),
        export_compensation: economics.export_compensation,
        grid_fee_import: economics.grid_fee_import,
        grid_fee_export: economics.grid_fee_export,
        vat_rate: economics.vat_rate,
    })
}

/// Slots with an unparsable start or a missing value are skipped
pub fn parse_price_points(attributes: &serde_json::Value) -> Vec<PricePoint> {
    ["raw_today", "raw_tomorrow"]
        .iter()
        .filter_map(|key| attributes.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .filter_map(|entry| {
            let start = entry.get("start")?.as_str()?;
            let price = entry.get("value")?.as_f64()?;
            let start = DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc);
            Some(PricePoint { start, price })
        })
        .collect()
}

/// Charger connection, state of charge, departure and force-charge entities
#[derive(Debug, Clone)]
pub struct HassVehicleSensors {
    client: HassClient,
    tz: Tz,
    logger: StructuredLogger,
}

impl HassVehicleSensors {
    pub fn new(client: HassClient, tz: Tz) -> Self {
        Self {
            client,
            tz,
            logger: get_logger("hass.vehicle"),
        }
    }

    async fn optional_state(&self, entity_id: Option<&str>) -> Option<EntityState> {
        let entity_id = entity_id?;
        match self.client.get_state(entity_id).await {
            Ok(state) if state.is_available() => Some(state),
            Ok(_) => None,
            Err(e) => {
                self.logger
                    .debug(&format!("Optional entity {} ignored: {}", entity_id, e));
                None
            }
        }
    }
}

#[async_trait]
impl VehicleSensors for HassVehicleSensors {
    async fn read_vehicle_state(&self, vehicle: &VehicleConfig) -> Result<VehicleReading> {
        // The charger status entity is the only mandatory reading
        let status = self.client.get_state(&vehicle.charger.status_entity).await?;
        let connected = is_connected(&status.state);

        let current_soc_pct = self
            .optional_state(vehicle.soc_entity.as_deref())
            .await
            .and_then(|s| s.as_f64().ok())
            .filter(|soc| (0.0..=100.0).contains(soc));
        let departure_time = self
            .optional_state(vehicle.departure_entity.as_deref())
            .await
            .and_then(|s| parse_departure(&s.state, self.tz));
        let force_charge = self
            .optional_state(vehicle.force_charge_entity.as_deref())
            .await
            .is_some_and(|s| s.is_on());

        Ok(VehicleReading {
            connected,
            current_soc_pct,
            force_charge,
            departure_time,
        })
    }
}

pub fn is_connected(charger_status: &str) -> bool {
    let status = charger_status.trim().to_ascii_lowercase();
    !NOT_CONNECTED.contains(&status.as_str())
}

/// Accepts RFC 3339 or Home Assistant's naive local `YYYY-MM-DD HH:MM:SS`
pub fn parse_departure(value: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}
