//! Minimal Home Assistant REST client
//!
//! Only two endpoints are used: `GET /api/states/<entity_id>` for readings
//! and `POST /api/services/<domain>/<service>` for charger commands.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

use crate::config::HomeAssistantConfig;
use crate::error::{Result, SmartEvError};
use crate::logging::{StructuredLogger, get_logger};

const TOKEN_ENV: &str = "SMARTEV_HASS_TOKEN";

/// One entity as returned by the states endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EntityState {
    /// False for the placeholder states Home Assistant reports for missing data
    pub fn is_available(&self) -> bool {
        !matches!(
            self.state.trim().to_ascii_lowercase().as_str(),
            "unavailable" | "unknown" | "none" | ""
        )
    }

    /// Numeric state; unavailable or non-numeric states are sensor errors
    pub fn as_f64(&self) -> Result<f64> {
        if !self.is_available() {
            return Err(SmartEvError::sensor_unavailable(
                &self.entity_id,
                format!("state is '{}'", self.state),
            ));
        }
        let value: f64 = self.state.trim().parse().map_err(|_| {
            SmartEvError::sensor_unavailable(
                &self.entity_id,
                format!("cannot parse '{}' as a number", self.state),
            )
        })?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(SmartEvError::sensor_unavailable(
                &self.entity_id,
                "value is not finite",
            ))
        }
    }

    /// Boolean-like state (`on`, `true`, `1`, `active`)
    pub fn is_on(&self) -> bool {
        matches!(
            self.state.trim().to_ascii_lowercase().as_str(),
            "on" | "true" | "1" | "active"
        )
    }
}

/// Authenticated client for one Home Assistant instance
#[derive(Clone)]
pub struct HassClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
    logger: StructuredLogger,
}

impl HassClient {
    /// The token comes from the configuration or, when empty, `SMARTEV_HASS_TOKEN`
    pub fn new(config: &HomeAssistantConfig, timeout: Duration) -> Result<Self> {
        let token = if config.token.trim().is_empty() {
            std::env::var(TOKEN_ENV).unwrap_or_default()
        } else {
            config.token.clone()
        };
        if token.trim().is_empty() {
            return Err(SmartEvError::config(format!(
                "Home Assistant token missing (set home_assistant.token or {})",
                TOKEN_ENV
            )));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            http,
            logger: get_logger("hass"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch an entity; a 404 is reported as an unavailable sensor
    pub async fn get_state(&self, entity_id: &str) -> Result<EntityState> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("smartev/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(SmartEvError::sensor_unavailable(
                entity_id,
                "entity does not exist",
            )),
            status if !status.is_success() => Err(SmartEvError::api(format!(
                "GET {} returned {}",
                entity_id, status
            ))),
            _ => {
                let state: EntityState = resp.json().await?;
                self.logger
                    .trace(&format!("{} = {}", state.entity_id, state.state));
                Ok(state)
            }
        }
    }

    /// Fetch an entity and require a usable state
    pub async fn get_available(&self, entity_id: &str) -> Result<EntityState> {
        let state = self.get_state(entity_id).await?;
        if state.is_available() {
            Ok(state)
        } else {
            Err(SmartEvError::sensor_unavailable(
                entity_id,
                format!("state is '{}'", state.state),
            ))
        }
    }

    pub async fn get_f64(&self, entity_id: &str) -> Result<f64> {
        self.get_state(entity_id).await?.as_f64()
    }

    /// Call a service; 5xx answers are worth retrying, other failures are not
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, service);
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, concat!("smartev/", env!("CARGO_PKG_VERSION")))
            .json(data)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            self.logger
                .debug(&format!("Service {}.{} accepted {}", domain, service, data));
            Ok(())
        } else if status.is_server_error() {
            Err(SmartEvError::network(format!(
                "{}.{} returned {}",
                domain, service, status
            )))
        } else {
            Err(SmartEvError::api(format!(
                "{}.{} returned {}",
                domain, service, status
            )))
        }
    }
}

impl std::fmt::Debug for HassClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(state: &str) -> EntityState {
        EntityState {
            entity_id: "sensor.grid_power".into(),
            state: state.into(),
            attributes: serde_json::Value::Null,
            last_updated: None,
        }
    }

    #[test]
    fn placeholder_states_are_unavailable() {
        for s in ["unavailable", "unknown", "", "  ", "Unavailable"] {
            assert!(!entity(s).is_available(), "{:?}", s);
            assert!(matches!(
                entity(s).as_f64(),
                Err(SmartEvError::SensorUnavailable { .. })
            ));
        }
    }

    #[test]
    fn numeric_states_parse() {
        assert_eq!(entity("-1250.5").as_f64().unwrap(), -1250.5);
        assert!(entity("abc").as_f64().is_err());
        assert!(entity("NaN").as_f64().is_err());
    }

    #[test]
    fn boolean_states() {
        assert!(entity("on").is_on());
        assert!(entity("Active").is_on());
        assert!(!entity("off").is_on());
        assert!(!entity("unavailable").is_on());
    }

    #[test]
    fn deserializes_api_payload() {
        let json = r#"{
            "entity_id": "sensor.nordpool",
            "state": "1.05",
            "attributes": {"unit_of_measurement": "SEK/kWh"},
            "last_updated": "2026-01-15T10:00:00+00:00"
        }"#;
        let state: EntityState = serde_json::from_str(json).unwrap();
        assert_eq!(state.as_f64().unwrap(), 1.05);
        assert!(state.last_updated.is_some());
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let config = HomeAssistantConfig {
            token: String::new(),
            ..Default::default()
        };
        if std::env::var(TOKEN_ENV).is_err() {
            let err = HassClient::new(&config, Duration::from_secs(1)).unwrap_err();
            assert!(matches!(err, SmartEvError::Config { .. }));
        }
    }
}
