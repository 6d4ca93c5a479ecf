//! AADT (annual average daily traffic) from a short observed flow.
//!
//! Without factors the hourly flow is simply scaled by 24 hours. With a
//! factor table and a recording timestamp the expansion becomes
//!
//! ```text
//! aadt = hourly_flow * 24 * F_DOW[weekday] * F_MOY[month] / HOD_share[hour]
//! ```
//!
//! where `HOD_share` is the observed hour's volume relative to the average
//! hour of the day.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::config::AadtFactorConfig;
use crate::flow::FlowSummary;

const HOURS_PER_DAY: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AadtMethod {
    Baseline,
    Factored,
}

/// Terms of the expansion from hourly flow to AADT. The temporal factors
/// are only present for the factored method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalingComponents {
    pub base_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour_share: Option<f64>,
}

impl ScalingComponents {
    fn baseline() -> Self {
        ScalingComponents {
            base_hours: HOURS_PER_DAY,
            weekday_factor: None,
            month_factor: None,
            hour_share: None,
        }
    }

    fn factored(timestamp: NaiveDateTime, factors: &AadtFactorConfig) -> Self {
        let weekday = timestamp.format("%a").to_string();
        let mut hour_share = factors.share_for_hour(timestamp.hour());
        if hour_share == 0.0 {
            hour_share = 1.0;
        }
        ScalingComponents {
            base_hours: HOURS_PER_DAY,
            weekday_factor: Some(factors.factor_for_weekday(&weekday)),
            month_factor: Some(factors.factor_for_month(timestamp.month())),
            hour_share: Some(hour_share),
        }
    }

    /// Multiplier applied to the hourly flow.
    pub fn factor(&self) -> f64 {
        self.base_hours * self.weekday_factor.unwrap_or(1.0) * self.month_factor.unwrap_or(1.0)
            / self.hour_share.unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DirectionAadt {
    pub hourly_flow: f64,
    pub scaling_components: ScalingComponents,
    pub aadt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AadtSummary {
    pub recording_id: String,
    pub method: AadtMethod,
    pub directions: BTreeMap<u8, DirectionAadt>,
    pub aadt_total: f64,
}

/// Expand directional hourly flows to AADT. Factors apply only when both a
/// factor table and a timestamp are available.
pub fn estimate_aadt(
    flow: &FlowSummary,
    timestamp: Option<NaiveDateTime>,
    factors: Option<&AadtFactorConfig>,
) -> AadtSummary {
    let (method, components) = match (timestamp, factors) {
        (Some(ts), Some(factors)) => (AadtMethod::Factored, ScalingComponents::factored(ts, factors)),
        (None, Some(_)) => {
            tracing::warn!(
                "recording {}: no timestamp, AADT falls back to 24h baseline",
                flow.recording_id
            );
            (AadtMethod::Baseline, ScalingComponents::baseline())
        }
        _ => (AadtMethod::Baseline, ScalingComponents::baseline()),
    };
    let factor = components.factor();

    let directions: BTreeMap<u8, DirectionAadt> = flow
        .directions
        .iter()
        .map(|(&direction, d)| {
            let hourly_flow = d.hourly_flow_veh_per_h;
            (
                direction,
                DirectionAadt {
                    hourly_flow,
                    scaling_components: components,
                    aadt: hourly_flow * factor,
                },
            )
        })
        .collect();
    let aadt_total = directions.values().map(|d| d.aadt).sum();

    AadtSummary {
        recording_id: flow.recording_id.clone(),
        method,
        directions,
        aadt_total,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
