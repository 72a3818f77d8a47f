//! Calendar-hour power tracking
//!
//! Effekttaxa tariffs bill the average import per clock hour (xx:00:00 to
//! xx:59:59). The tracker integrates import energy within the current hour
//! and derives how much power may still be drawn for the rest of the hour
//! without the full-hour average exceeding the configured limit.
//!
//! Hours are truncated in UTC, which matches local clock hours for every
//! whole-hour timezone offset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Lower bound for the elapsed and remaining hour fractions
const MIN_HOUR_FRACTION: f64 = 1.0 / SECONDS_PER_HOUR;

/// Truncate a timestamp to the start of its clock hour
pub fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(t)
}

/// Time-weighted accumulator of site import within the current clock hour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarHourTracker {
    hour_start: Option<DateTime<Utc>>,
    energy_wh_so_far: f64,
    last_sample_time: Option<DateTime<Utc>>,
}

impl CalendarHourTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of the hour currently being accumulated
    pub fn hour_start(&self) -> Option<DateTime<Utc>> {
        self.hour_start
    }

    /// Import energy accumulated since `hour_start`
    pub fn energy_wh_so_far(&self) -> f64 {
        self.energy_wh_so_far
    }

    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.last_sample_time
    }

    /// Record a grid reading taken at `now` and return the remaining headroom in kW.
    pub fn update(&mut self, grid_power_w: f64, now: DateTime<Utc>, power_limit_kw: f64) -> f64 {
        self.record(grid_power_w, now);
        self.headroom_kw(power_limit_kw, now)
    }

    /// Integrate `grid_power_w` over the time since the previous sample.
    ///
    /// The reading is held over the elapsed interval. An interval that
    /// spans an hour boundary is split there and only the part inside the
    /// new hour is kept. Export (negative power) contributes nothing.
    pub fn record(&mut self, grid_power_w: f64, now: DateTime<Utc>) {
        let hour = truncate_to_hour(now);
        if self.hour_start != Some(hour) {
            self.hour_start = Some(hour);
            self.energy_wh_so_far = 0.0;
        }

        if let Some(last) = self.last_sample_time {
            let from = last.max(hour);
            let elapsed_s = seconds_between(from, now);
            if elapsed_s > 0.0 && grid_power_w.is_finite() {
                self.energy_wh_so_far += grid_power_w.max(0.0) * elapsed_s / SECONDS_PER_HOUR;
            }
        }

        self.last_sample_time = Some(match self.last_sample_time {
            Some(last) if last > now => last,
            _ => now,
        });
    }

    /// Fraction of the current hour that has elapsed at `now`, clamped to `[1/3600, 1]`
    pub fn elapsed_fraction(&self, now: DateTime<Utc>) -> f64 {
        let start = self.hour_start.unwrap_or_else(|| truncate_to_hour(now));
        (seconds_between(start, now) / SECONDS_PER_HOUR).clamp(MIN_HOUR_FRACTION, 1.0)
    }

    /// Power that may be drawn for the rest of the hour while keeping the
    /// full-hour average at or below `power_limit_kw`.
    pub fn headroom_kw(&self, power_limit_kw: f64, now: DateTime<Utc>) -> f64 {
        let remaining_fraction = (1.0 - self.elapsed_fraction(now)).max(MIN_HOUR_FRACTION);
        let budget_kwh = power_limit_kw - self.energy_wh_so_far / 1000.0;
        (budget_kwh / remaining_fraction).max(0.0)
    }

    /// Average import so far this hour. Observability only.
    pub fn average_kw_so_far(&self, now: DateTime<Utc>) -> f64 {
        (self.energy_wh_so_far / 1000.0) / self.elapsed_fraction(now)
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
