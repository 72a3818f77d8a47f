//! Opportunity cost between exporting now and charging at night
//!
//! Compares what a kWh earns when exported at the current spot price with
//! what it costs to buy back at the cheapest night price, fees and VAT
//! included.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::{PriceContext, PricePoint};
use crate::tracker::truncate_to_hour;

/// Charge now or wait for cheaper night electricity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EconomicVerdict {
    ChargeNow,
    DeferToNight,
}

/// Outcome of one economic evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpportunityCost {
    pub verdict: EconomicVerdict,
    pub export_revenue: f64,
    /// `None` when no night price is known
    pub night_charge_cost: Option<f64>,
    pub reason: &'static str,
}

impl OpportunityCost {
    /// `night_charge_cost - export_revenue`; negative when deferring pays off
    pub fn opportunity_cost(&self) -> Option<f64> {
        self.night_charge_cost.map(|night| night - self.export_revenue)
    }

    /// Fallback used when the price collaborator cannot be read
    pub fn prices_unavailable() -> Self {
        Self {
            verdict: EconomicVerdict::ChargeNow,
            export_revenue: 0.0,
            night_charge_cost: None,
            reason: "price_data_unavailable",
        }
    }
}

/// Evaluate the export-vs-night trade-off.
///
/// The comparison is a strict `>` with no hysteresis band, so prices
/// hovering around equality can flip the verdict between cycles.
pub fn evaluate(prices: &PriceContext) -> OpportunityCost {
    let export_revenue = prices.spot_price + prices.export_compensation - prices.grid_fee_export;

    let Some(night_spot) = prices.cheapest_night_spot else {
        return OpportunityCost {
            verdict: EconomicVerdict::ChargeNow,
            export_revenue,
            night_charge_cost: None,
            reason: "no_night_prices_available",
        };
    };

    let night_charge_cost = (night_spot + prices.grid_fee_import) * (1.0 + prices.vat_rate);
    if export_revenue > night_charge_cost {
        OpportunityCost {
            verdict: EconomicVerdict::DeferToNight,
            export_revenue,
            night_charge_cost: Some(night_charge_cost),
            reason: "export_more_profitable",
        }
    } else {
        OpportunityCost {
            verdict: EconomicVerdict::ChargeNow,
            export_revenue,
            night_charge_cost: Some(night_charge_cost),
            reason: "charging_now_cheaper",
        }
    }
}

/// Local clock hours considered "night", `[start_hour, end_hour)`, wrapping midnight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NightWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub tz: Tz,
}

impl NightWindow {
    pub fn new(start_hour: u32, end_hour: u32, tz: Tz) -> Self {
        Self {
            start_hour,
            end_hour,
            tz,
        }
    }

    /// Whether the local hour of `t` falls inside the window.
    /// Equal start and end hours cover the whole day.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let hour = t.with_timezone(&self.tz).hour();
        match self.start_hour.cmp(&self.end_hour) {
            std::cmp::Ordering::Less => hour >= self.start_hour && hour < self.end_hour,
            std::cmp::Ordering::Greater => hour >= self.start_hour || hour < self.end_hour,
            std::cmp::Ordering::Equal => true,
        }
    }
}

/// Cheapest price among slots that start in the night window and have not
/// ended yet (the slot containing `now` still counts).
pub fn cheapest_night_price(
    prices: &[PricePoint],
    now: DateTime<Utc>,
    window: &NightWindow,
) -> Option<f64> {
    let current_hour = truncate_to_hour(now);
    prices
        .iter()
        .filter(|p| p.start >= current_hour && window.contains(p.start))
        .map(|p| p.price)
        .filter(|p| p.is_finite())
        .min_by(f64::total_cmp)
}
