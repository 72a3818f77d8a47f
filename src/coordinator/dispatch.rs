//! Collaborator calls with timeouts and bounded retry
//!
//! Reads and charger commands get the same deadline and backoff. A charger
//! command either lands, fails in a way worth retrying, or fails for good.
//! Retries happen inside the current cycle only; nothing is queued for later
//! cycles.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use super::state::SentCommand;
use crate::collaborators::ChargerControl;
use crate::config::{ControlsConfig, VehicleConfig};
use crate::error::{Result, SmartEvError};
use crate::logging::get_logger;
use crate::model::VehicleAllocation;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Result of sending one limit to a charger
#[derive(Debug)]
pub enum CommandOutcome {
    Applied,
    /// Transient failure; the last attempt's error once retries are exhausted
    Retryable(SmartEvError),
    /// The charger or the API rejected the command
    Terminal(SmartEvError),
}

impl CommandOutcome {
    pub const fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied)
    }

    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => CommandOutcome::Applied,
            Err(e) if e.is_retryable() => CommandOutcome::Retryable(e),
            Err(e) => CommandOutcome::Terminal(e),
        }
    }
}

/// Timeout and backoff for collaborator calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn from_controls(controls: &ControlsConfig) -> Self {
        Self {
            timeout: secs_f64(controls.command_timeout_seconds, Duration::from_secs(5)),
            max_retries: controls.max_retries,
            initial_delay: secs_f64(controls.retry_delay_seconds, Duration::from_secs(1)),
        }
    }

    /// Delay before retry number `attempt` (0-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_controls(&ControlsConfig::default())
    }
}

fn secs_f64(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

/// Run `fut` with a deadline, mapping expiry to a `Timeout` error
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SmartEvError::timeout(format!(
            "{} did not complete within {:?}",
            what, limit
        ))),
    }
}

/// Run a collaborator read, retrying transient failures with exponential backoff.
///
/// Errors that are not retryable (an `unavailable` sensor state, a rejected
/// request) are returned after the first attempt.
pub async fn read_with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut read: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match with_timeout(policy.timeout, what, read()).await {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                get_logger("dispatch").debug(&format!(
                    "Read of {} failed (attempt {}): {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    e,
                    delay
                ));
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Send a limit, retrying transient failures with exponential backoff
pub async fn send_with_retry(
    charger: &dyn ChargerControl,
    vehicle: &VehicleConfig,
    allocation: VehicleAllocation,
    policy: &RetryPolicy,
) -> CommandOutcome {
    let logger = get_logger("dispatch").for_vehicle(&vehicle.id);
    let mut attempt = 0u32;
    loop {
        let result = with_timeout(
            policy.timeout,
            "charger command",
            charger.send_charger_limit(vehicle, allocation.amps, allocation.phases),
        )
        .await;

        match CommandOutcome::from_result(result) {
            CommandOutcome::Retryable(e) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                logger.warn(&format!(
                    "Charger command attempt {} failed: {}; retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                ));
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

/// Whether `target` has to be (re)sent given what the charger last acknowledged
pub fn needs_send(
    last: Option<&SentCommand>,
    target: VehicleAllocation,
    now: DateTime<Utc>,
    refresh: chrono::Duration,
) -> bool {
    match last {
        None => true,
        Some(sent) => sent.allocation != target || now - sent.sent_at >= refresh,
    }
}
