//! Error types and handling for SmartEV
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting. Errors never unwind
//! past the coordinator's per-cycle boundary; each stage maps them to a
//! conservative decision instead.

use thiserror::Error;

/// Result type alias for SmartEV operations
pub type Result<T> = std::result::Result<T, SmartEvError>;

/// Main error type for SmartEV
#[derive(Debug, Error)]
pub enum SmartEvError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// A sensor read failed or returned a stale/unusable value
    #[error("Sensor unavailable: {sensor} - {message}")]
    SensorUnavailable { sensor: String, message: String },

    /// Sending a limit to a charger failed
    #[error("Charger command failed for {vehicle_id}: {message}")]
    ChargerCommand { vehicle_id: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// API integration errors (Home Assistant)
    #[error("API error: {message}")]
    Api { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl SmartEvError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        SmartEvError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        SmartEvError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new sensor-unavailable error
    pub fn sensor_unavailable<S: Into<String>, M: Into<String>>(sensor: S, message: M) -> Self {
        SmartEvError::SensorUnavailable {
            sensor: sensor.into(),
            message: message.into(),
        }
    }

    /// Create a new charger command error
    pub fn charger_command<S: Into<String>, M: Into<String>>(vehicle_id: S, message: M) -> Self {
        SmartEvError::ChargerCommand {
            vehicle_id: vehicle_id.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        SmartEvError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        SmartEvError::Network {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        SmartEvError::Api {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        SmartEvError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        SmartEvError::Generic {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Transport hiccups and timeouts are transient; rejected requests,
    /// validation and configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmartEvError::Timeout { .. }
                | SmartEvError::Network { .. }
                | SmartEvError::Io { .. }
                | SmartEvError::ChargerCommand { .. }
        )
    }
}

impl From<std::io::Error> for SmartEvError {
    fn from(err: std::io::Error) -> Self {
        SmartEvError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for SmartEvError {
    fn from(err: serde_yaml::Error) -> Self {
        SmartEvError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SmartEvError {
    fn from(err: serde_json::Error) -> Self {
        SmartEvError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "hass")]
impl From<reqwest::Error> for SmartEvError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SmartEvError::timeout(err.to_string())
        } else if err.is_status() {
            SmartEvError::api(err.to_string())
        } else {
            SmartEvError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for SmartEvError {
    fn from(err: chrono::ParseError) -> Self {
        SmartEvError::validation("datetime", err.to_string())
    }
}
