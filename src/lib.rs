//! # SmartEV - calendar-hour aware EV charging optimizer
//!
//! Keeps the average grid import of every calendar hour under a configured
//! ceiling while deciding, vehicle by vehicle, whether charging now beats
//! charging tonight. Grid sensors, spot prices and chargers are reached
//! through Home Assistant.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration, defaults and validation
//! - `logging`: tracing subscriber setup and component loggers
//! - `model`: plain data shared by the pipeline
//! - `tracker`: calendar-hour energy accounting and headroom
//! - `safety`: safe mode, Grid Rewards pause and phase-switch cooldowns
//! - `economics`: charge-now versus night-charging comparison
//! - `allocator`: priority-ordered current and phase allocation
//! - `coordinator`: the timed pipeline, runtime controls and dispatch
//! - `collaborators`: traits at the boundary to sensors and chargers
//! - `hass`: Home Assistant implementations of those traits
//! - `persistence`: runtime overrides across restarts
//! - `web`: HTTP API

pub mod allocator;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod economics;
pub mod error;
#[cfg(feature = "hass")]
pub mod hass;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod safety;
pub mod tracker;
#[cfg(feature = "web")]
pub mod web;

#[cfg(test)]
mod config_tests;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{ControlCommand, Coordinator, CoordinatorHandle, DecisionSnapshot};
pub use error::{Result, SmartEvError};
