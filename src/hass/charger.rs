use async_trait::async_trait;
use serde_json::json;

use super::client::HassClient;
use crate::collaborators::ChargerControl;
use crate::config::VehicleConfig;
use crate::error::{Result, SmartEvError};
use crate::logging::{StructuredLogger, get_logger};
use crate::model::Phases;

/// Statuses in which a cloud schedule holds the charger
const CLOUD_HELD: &[&str] = &["awaiting_smart_charging", "standby"];

/// Easee chargers driven through the circuit dynamic limit service
#[derive(Debug, Clone)]
pub struct HassChargerControl {
    client: HassClient,
    domain: String,
    logger: StructuredLogger,
}

impl HassChargerControl {
    pub fn new(client: HassClient, domain: &str) -> Self {
        Self {
            client,
            domain: domain.to_string(),
            logger: get_logger("hass.charger"),
        }
    }

    /// Take the charger back from a cloud schedule before commanding current
    async fn resume_if_held(&self, vehicle: &VehicleConfig) -> Result<()> {
        let status = self.client.get_state(&vehicle.charger.status_entity).await?;
        let status = status.state.trim().to_ascii_lowercase();
        if !CLOUD_HELD.contains(&status.as_str()) {
            return Ok(());
        }
        self.logger.for_vehicle(&vehicle.id).info(&format!(
            "Charger {} is '{}', resuming to take control",
            vehicle.charger.charger_id, status
        ));
        self.client
            .call_service(
                &self.domain,
                "action_command",
                &json!({
                    "charger_id": vehicle.charger.charger_id,
                    "action_command": "resume",
                }),
            )
            .await
    }
}

/// Service payload: `amps` on active phases, 0 on the others
pub fn dynamic_limit_payload(circuit_id: &str, amps: u32, phases: Phases) -> serde_json::Value {
    let (p2, p3) = match phases {
        Phases::One => (0, 0),
        Phases::Three => (amps, amps),
    };
    json!({
        "circuit_id": circuit_id,
        "currentP1": amps,
        "currentP2": p2,
        "currentP3": p3,
    })
}

#[async_trait]
impl ChargerControl for HassChargerControl {
    async fn send_charger_limit(
        &self,
        vehicle: &VehicleConfig,
        amps: u32,
        phases: Phases,
    ) -> Result<()> {
        if vehicle.charger.circuit_id.trim().is_empty() {
            return Err(SmartEvError::validation(
                "charger.circuit_id",
                format!("Vehicle '{}' has no circuit id", vehicle.id),
            ));
        }

        let result = async {
            if amps > 0 {
                self.resume_if_held(vehicle).await?;
            }
            self.client
                .call_service(
                    &self.domain,
                    "set_circuit_dynamic_limit",
                    &dynamic_limit_payload(&vehicle.charger.circuit_id, amps, phases),
                )
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.logger.for_vehicle(&vehicle.id).info(&format!(
                    "Circuit {} limited to {} A on {} phase(s)",
                    vehicle.charger.circuit_id,
                    amps,
                    phases.count()
                ));
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                Err(SmartEvError::charger_command(&vehicle.id, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
