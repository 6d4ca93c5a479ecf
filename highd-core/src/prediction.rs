//! Crash prediction result structures and their accumulation.
//!
//! `PredictionBuilder` collects calibrated crash estimates per collision type
//! and run-wide, then `finish()` derives the totals. The serialized shape is
//! fixed: every collision type of the selected coefficient set is present,
//! and every KABCO level is present in every breakdown.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::spf::SeverityProfile;
use crate::types::{Kabco, Severity};

/// Expected economic loss, total and per severity level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EconomicLoss {
    pub total: f64,
    pub by_severity: Kabco<f64>,
}

impl EconomicLoss {
    fn add(&mut self, level: Severity, amount: f64) {
        self.by_severity[level] += amount;
    }

    fn finish(&mut self) {
        self.total = self.by_severity.total();
    }
}

/// Predicted crashes for one collision type, summed over directions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CollisionPrediction {
    /// Fatal-and-injury crashes per year.
    pub fi: f64,
    /// Property-damage-only crashes per year.
    pub pdo: f64,
    /// All-severity crashes per year.
    pub total: f64,
    pub kabco: Kabco<f64>,
    pub economic_loss: EconomicLoss,
}

/// Full output of one `SpfModel::predict` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub collision_types: BTreeMap<String, CollisionPrediction>,
    pub total_all_sev: f64,
    pub total_fi: f64,
    pub total_pdo: f64,
    pub severity_breakdown: Kabco<f64>,
    pub economic_loss: EconomicLoss,
    pub k_overdispersion: f64,
    #[serde(rename = "calibration_C")]
    pub calibration_c: f64,
}

impl PredictionResult {
    /// Result for one collision type, if it was part of the prediction.
    pub fn collision(&self, collision_type: &str) -> Option<&CollisionPrediction> {
        self.collision_types.get(collision_type)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates calibrated estimates into a `PredictionResult`.
#[derive(Debug)]
pub(crate) struct PredictionBuilder {
    collisions: BTreeMap<String, CollisionPrediction>,
    severity_breakdown: Kabco<f64>,
    economic_loss: EconomicLoss,
    k_overdispersion: f64,
    calibration_c: f64,
}

impl PredictionBuilder {
    /// Start with an all-zero entry for each collision type.
    pub(crate) fn new<'a>(
        collision_types: impl IntoIterator<Item = &'a str>,
        k_overdispersion: f64,
        calibration_c: f64,
    ) -> Self {
        PredictionBuilder {
            collisions: collision_types
                .into_iter()
                .map(|c| (c.to_string(), CollisionPrediction::default()))
                .collect(),
            severity_breakdown: Kabco::default(),
            economic_loss: EconomicLoss::default(),
            k_overdispersion,
            calibration_c,
        }
    }

    /// Add one calibrated crash estimate for `collision_type`, split by
    /// `profile`.
    pub(crate) fn add(&mut self, collision_type: &str, calibrated: f64, profile: &SeverityProfile) {
        let entry = self
            .collisions
            .entry(collision_type.to_string())
            .or_default();

        entry.fi += calibrated * profile.fi_share;
        entry.pdo += calibrated * profile.pdo_share;
        entry.total += calibrated;

        for (level, share) in profile.kabco_shares.iter() {
            let expected = calibrated * share;
            let loss = expected * profile.severity_costs[level];

            entry.kabco[level] += expected;
            entry.economic_loss.add(level, loss);
            self.severity_breakdown[level] += expected;
            self.economic_loss.add(level, loss);
        }
    }

    pub(crate) fn finish(mut self) -> PredictionResult {
        for prediction in self.collisions.values_mut() {
            prediction.economic_loss.finish();
        }
        self.economic_loss.finish();

        PredictionResult {
            total_all_sev: self.collisions.values().map(|c| c.total).sum(),
            total_fi: self.severity_breakdown.fatal_injury(),
            total_pdo: self.severity_breakdown.o,
            severity_breakdown: self.severity_breakdown,
            economic_loss: self.economic_loss,
            k_overdispersion: self.k_overdispersion,
            calibration_c: self.calibration_c,
            collision_types: self.collisions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
