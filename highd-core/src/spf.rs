//! Safety Performance Functions for freeway segments.
//!
//! Log-linear SPF per collision type:
//!
//! ```text
//! N = exp(a + b·ln(AADT) + c·ln(L) + d·ln(lanes))
//! ```
//!
//! calibrated by `C × CMF`, then split into KABCO severities with a
//! per-collision-type severity profile and priced into economic loss.
//!
//! Coefficient and severity tables are loaded once into an `SpfModel` and
//! never mutated afterwards, so a model can be shared across threads and
//! `predict()` is a pure function of its inputs.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::HsmConfig;
use crate::defaults;
use crate::prediction::{PredictionBuilder, PredictionResult};
use crate::table::{read_csv_file, read_csv_str, Row};
use crate::types::{normalize_key, HsmError, Kabco, Result, Severity};

/// Severity shares used when a severity row omits a share or no row matches.
pub const DEFAULT_KABCO_SHARES: Kabco<f64> = Kabco {
    k: 0.02,
    a: 0.06,
    b: 0.12,
    c: 0.20,
    o: 0.60,
};

/// Cost per crash by severity, in the table's currency unit.
pub const DEFAULT_SEVERITY_COSTS: Kabco<f64> = Kabco {
    k: 11_000_000.0,
    a: 1_500_000.0,
    b: 450_000.0,
    c: 120_000.0,
    o: 10_000.0,
};

// ---------------------------------------------------------------------------
// Coefficients
// ---------------------------------------------------------------------------

/// Regression coefficients for one (facility, area type, collision type).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpfCoefficient {
    pub facility: String,
    pub area_type: String,
    pub collision_type: String,
    pub intercept: f64,
    pub aadt_exponent: f64,
    pub length_exponent: f64,
    pub lanes_exponent: f64,
}

impl SpfCoefficient {
    /// Build from a coefficient table row. Keys are normalized.
    pub fn from_row(row: &Row, index: usize) -> Result<Self> {
        let context = format!("coefficient row {}", index + 1);
        let key = |field: &str| {
            row.get(field)
                .map(normalize_key)
                .ok_or_else(|| HsmError::MissingField {
                    context: context.clone(),
                    field: field.to_string(),
                })
        };

        Ok(SpfCoefficient {
            facility: key("facility")?,
            area_type: key("area_type")?,
            collision_type: key("collision_type")?,
            intercept: row.require_f64("intercept", &context)?,
            aadt_exponent: row.require_f64("aadt_exponent", &context)?,
            length_exponent: row.require_f64("length_exponent", &context)?,
            lanes_exponent: row.parse_f64("lanes_exponent", &context)?.unwrap_or(0.0),
        })
    }

    /// Uncalibrated crashes per year for one direction.
    ///
    /// Zero exposure (any input ≤ 0) predicts exactly 0.0.
    pub fn predict(&self, aadt: f64, length_miles: f64, lanes: f64) -> f64 {
        if aadt <= 0.0 || length_miles <= 0.0 || lanes <= 0.0 {
            return 0.0;
        }
        let estimate = self.intercept
            + self.aadt_exponent * aadt.ln()
            + self.length_exponent * length_miles.ln()
            + self.lanes_exponent * lanes.ln();
        estimate.exp()
    }
}

// ---------------------------------------------------------------------------
// Severity profiles
// ---------------------------------------------------------------------------

/// KABCO split and crash costs for one collision type.
///
/// `kabco_shares` are non-negative and sum to 1.0; `fi_share` is K+A+B+C and
/// `pdo_share` is O.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityProfile {
    pub kabco_shares: Kabco<f64>,
    pub fi_share: f64,
    pub pdo_share: f64,
    pub severity_costs: Kabco<f64>,
}

impl Default for SeverityProfile {
    fn default() -> Self {
        SeverityProfile::new(DEFAULT_KABCO_SHARES, DEFAULT_SEVERITY_COSTS, None)
    }
}

impl SeverityProfile {
    /// Normalize raw shares into a profile.
    ///
    /// Negative shares count as zero. If nothing positive remains the default
    /// shares are used. `fi_pdo` overrides the FI/PDO split when both values
    /// are non-negative with a positive sum: the K/A/B/C block is rescaled to
    /// the FI target keeping its internal ratios (split equally if the block
    /// is zero) and O is set to the PDO target.
    pub fn new(raw_shares: Kabco<f64>, severity_costs: Kabco<f64>, fi_pdo: Option<(f64, f64)>) -> Self {
        let mut shares = raw_shares.map(|_, v| if v.is_finite() { v.max(0.0) } else { 0.0 });
        if shares.total() <= 0.0 {
            shares = DEFAULT_KABCO_SHARES;
        }
        shares = normalized(shares);

        if let Some((fi, pdo)) = fi_pdo {
            let peak = fi.max(pdo);
            if fi.is_finite() && pdo.is_finite() && fi >= 0.0 && pdo >= 0.0 && peak > 0.0 {
                // Scale by the larger value first so the sum cannot overflow.
                let (fi, pdo) = (fi / peak, pdo / peak);
                let fi_target = fi / (fi + pdo);
                let pdo_target = pdo / (fi + pdo);
                let block = shares.fatal_injury();
                for level in Severity::FATAL_INJURY {
                    shares[level] = if block > 0.0 {
                        shares[level] / block * fi_target
                    } else {
                        fi_target / Severity::FATAL_INJURY.len() as f64
                    };
                }
                shares.o = pdo_target;
                shares = normalized(shares);
            }
        }

        SeverityProfile {
            fi_share: shares.fatal_injury(),
            pdo_share: shares.o,
            kabco_shares: shares,
            severity_costs,
        }
    }

    /// Build from a severity table row. Missing numeric fields take the
    /// defaults; malformed ones are a parse error.
    pub fn from_row(row: &Row, index: usize) -> Result<Self> {
        let context = format!("severity row {}", index + 1);

        let mut shares = DEFAULT_KABCO_SHARES;
        let mut costs = DEFAULT_SEVERITY_COSTS;
        for level in Severity::ALL {
            if let Some(v) = row.parse_f64(&format!("{}_share", level.key()), &context)? {
                shares[level] = v;
            }
            if let Some(v) = row.parse_f64(&format!("{}_cost", level.key()), &context)? {
                costs[level] = v;
            }
        }

        let fi = row.parse_f64("fi_share", &context)?;
        let pdo = row.parse_f64("pdo_share", &context)?;
        let fi_pdo = fi.zip(pdo);

        Ok(SeverityProfile::new(shares, costs, fi_pdo))
    }
}

/// Rescale to sum to 1.0. Dividing by the largest share first keeps the
/// total finite for shares near `f64::MAX`.
fn normalized(shares: Kabco<f64>) -> Kabco<f64> {
    let peak = Severity::ALL.iter().map(|&level| shares[level]).fold(0.0, f64::max);
    if peak <= 0.0 {
        return shares;
    }
    let scaled = shares.map(|_, v| v / peak);
    let total = scaled.total();
    scaled.map(|_, v| v / total)
}

/// Severity profile key: (facility, area type, collision type).
pub type ProfileKey = (String, String, String);

// ---------------------------------------------------------------------------
// Directional input
// ---------------------------------------------------------------------------

/// Traffic and geometry for one direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionalInput {
    pub lane_count: f64,
    pub segment_length_miles: f64,
    pub aadt: f64,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Loaded SPF coefficients, severity profiles, and calibration.
#[derive(Debug, Clone)]
pub struct SpfModel {
    /// (facility, area type) → collision type → coefficients.
    coefficients: BTreeMap<(String, String), BTreeMap<String, SpfCoefficient>>,
    profiles: HashMap<ProfileKey, SeverityProfile>,
    fallback_profile: SeverityProfile,
    config: HsmConfig,
}

impl SpfModel {
    /// Build a model from parsed records. Keys are normalized and the first
    /// record for a key wins.
    pub fn new(
        coefficients: impl IntoIterator<Item = SpfCoefficient>,
        profiles: impl IntoIterator<Item = (ProfileKey, SeverityProfile)>,
        config: HsmConfig,
    ) -> Self {
        let mut by_site: BTreeMap<(String, String), BTreeMap<String, SpfCoefficient>> =
            BTreeMap::new();
        for mut coef in coefficients {
            coef.facility = normalize_key(&coef.facility);
            coef.area_type = normalize_key(&coef.area_type);
            coef.collision_type = normalize_key(&coef.collision_type);
            let site = by_site
                .entry((coef.facility.clone(), coef.area_type.clone()))
                .or_default();
            if site.contains_key(&coef.collision_type) {
                tracing::warn!(
                    "duplicate SPF coefficients for {}/{}/{}; keeping the first",
                    coef.facility,
                    coef.area_type,
                    coef.collision_type
                );
                continue;
            }
            site.insert(coef.collision_type.clone(), coef);
        }

        let mut by_key = HashMap::new();
        for ((facility, area_type, collision_type), profile) in profiles {
            let key = (
                normalize_key(&facility),
                normalize_key(&area_type),
                normalize_key(&collision_type),
            );
            if by_key.contains_key(&key) {
                tracing::warn!(
                    "duplicate severity row for {}/{}/{}; keeping the first",
                    key.0,
                    key.1,
                    key.2
                );
                continue;
            }
            by_key.insert(key, profile);
        }

        SpfModel {
            coefficients: by_site,
            profiles: by_key,
            fallback_profile: SeverityProfile::default(),
            config,
        }
    }

    /// Build a model from coefficient and severity table rows.
    ///
    /// Any malformed numeric field fails the whole load.
    pub fn from_rows(coefficient_rows: &[Row], severity_rows: &[Row], config: HsmConfig) -> Result<Self> {
        let coefficients = coefficient_rows
            .iter()
            .enumerate()
            .map(|(i, row)| SpfCoefficient::from_row(row, i))
            .collect::<Result<Vec<_>>>()?;

        let profiles = severity_rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let key = (
                    row.get("facility").map(normalize_key).unwrap_or_default(),
                    row.get("area_type").map(normalize_key).unwrap_or_default(),
                    row.get("collision_type").map(normalize_key).unwrap_or_default(),
                );
                SeverityProfile::from_row(row, i).map(|profile| (key, profile))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "loaded {} SPF coefficient rows and {} severity rows",
            coefficients.len(),
            profiles.len()
        );
        Ok(SpfModel::new(coefficients, profiles, config))
    }

    /// Build a model from CSV text.
    pub fn from_csv_str(coefficients_csv: &str, severity_csv: &str, config: HsmConfig) -> Result<Self> {
        SpfModel::from_rows(&read_csv_str(coefficients_csv), &read_csv_str(severity_csv), config)
    }

    /// Build a model from CSV files.
    pub fn from_files(coefficients_path: &Path, severity_path: &Path, config: HsmConfig) -> Result<Self> {
        let coefficient_rows = read_csv_file(coefficients_path)?;
        let severity_rows = read_csv_file(severity_path)?;
        SpfModel::from_rows(&coefficient_rows, &severity_rows, config)
    }

    /// Model with the built-in freeway coefficient and severity tables.
    pub fn builtin(config: HsmConfig) -> Result<Self> {
        SpfModel::from_csv_str(defaults::FREEWAY_SPF_CSV, defaults::SEVERITY_DISTRIBUTION_CSV, config)
    }

    /// Load each table from its path if given, else from the built-in table.
    pub fn load(coefficients_path: Option<&Path>, severity_path: Option<&Path>, config: HsmConfig) -> Result<Self> {
        let coefficient_rows = match coefficients_path {
            Some(path) => read_csv_file(path)?,
            None => read_csv_str(defaults::FREEWAY_SPF_CSV),
        };
        let severity_rows = match severity_path {
            Some(path) => read_csv_file(path)?,
            None => read_csv_str(defaults::SEVERITY_DISTRIBUTION_CSV),
        };
        SpfModel::from_rows(&coefficient_rows, &severity_rows, config)
    }

    pub fn config(&self) -> &HsmConfig {
        &self.config
    }

    /// All (facility, area type) combinations with coefficients.
    pub fn sites(&self) -> impl Iterator<Item = (&str, &str)> {
        self.coefficients
            .keys()
            .map(|(f, a)| (f.as_str(), a.as_str()))
    }

    /// Coefficients for a (facility, area type), keyed by collision type.
    pub fn select_coefficients(
        &self,
        facility: &str,
        area_type: &str,
    ) -> Result<&BTreeMap<String, SpfCoefficient>> {
        let facility = normalize_key(facility);
        let area_type = normalize_key(area_type);
        match self.coefficients.get(&(facility.clone(), area_type.clone())) {
            Some(selected) if !selected.is_empty() => Ok(selected),
            _ => Err(HsmError::MissingCoefficients {
                facility,
                area_type,
            }),
        }
    }

    /// Severity profile for a collision type, or the default profile if the
    /// severity table has no matching row.
    pub fn severity_profile(&self, facility: &str, area_type: &str, collision_type: &str) -> &SeverityProfile {
        let key = (
            normalize_key(facility),
            normalize_key(area_type),
            normalize_key(collision_type),
        );
        self.profiles.get(&key).unwrap_or(&self.fallback_profile)
    }

    /// Predict annual crashes for a site.
    ///
    /// Every collision type with coefficients for the site appears in the
    /// result, zero-valued if no direction contributed. Fails only when the
    /// site has no coefficients.
    pub fn predict(
        &self,
        facility: &str,
        area_type: &str,
        directional_inputs: &BTreeMap<u8, DirectionalInput>,
    ) -> Result<PredictionResult> {
        let facility = normalize_key(facility);
        let area_type = normalize_key(area_type);
        let selected = self.select_coefficients(&facility, &area_type)?;
        let config = &self.config;

        let mean_length = if directional_inputs.is_empty() {
            0.0
        } else {
            directional_inputs
                .values()
                .map(|d| d.segment_length_miles)
                .sum::<f64>()
                / directional_inputs.len() as f64
        };
        let k_value = config.overdispersion.k_for_length(mean_length);

        let mut builder = PredictionBuilder::new(
            selected.keys().map(String::as_str),
            k_value,
            config.calibration_factor,
        );

        for input in directional_inputs.values() {
            for (collision, coef) in selected {
                let base = coef.predict(input.aadt, input.segment_length_miles, input.lane_count);
                let calibrated = base * config.calibration_factor * config.cmf_for_key(collision);
                let profile = self.severity_profile(&facility, &area_type, collision);
                builder.add(collision, calibrated, profile);
            }
        }

        Ok(builder.finish())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const COEFFS: &str = "facility,area_type,collision_type,intercept,aadt_exponent,length_exponent,lanes_exponent
Freeway, Urban ,SV,-2.0,0.5,0.3,0.1
freeway,urban,mv,-3.0,0.7,1.0,
freeway,rural,sv,-2.5,0.4,1.0,0.0
";

    const SEVERITY: &str = "facility,area_type,collision_type,k_share,a_share,b_share,c_share,o_share,k_cost,a_cost,b_cost,c_cost,o_cost,fi_share,pdo_share
freeway,urban,mv,0.01,0.04,0.10,0.15,0.70,,,,,,,
freeway,rural,sv,1,1,1,1,4,100,100,100,100,100,0.5,0.5
";

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn model() -> SpfModel {
        SpfModel::from_csv_str(COEFFS, SEVERITY, HsmConfig::default()).unwrap()
    }

    fn one_direction(aadt: f64, length: f64, lanes: f64) -> BTreeMap<u8, DirectionalInput> {
        BTreeMap::from([(
            1,
            DirectionalInput {
                lane_count: lanes,
                segment_length_miles: length,
                aadt,
            },
        )])
    }

    fn sv_coefficient() -> SpfCoefficient {
        model().select_coefficients("freeway", "urban").unwrap()["sv"].clone()
    }

    #[test]
    fn test_keys_normalized_on_load() {
        let coef = sv_coefficient();
        assert_eq!(coef.facility, "freeway");
        assert_eq!(coef.area_type, "urban");
        assert_eq!(coef.collision_type, "sv");
    }

    #[test]
    fn test_lanes_exponent_defaults_to_zero() {
        let model = model();
        let mv = &model.select_coefficients("freeway", "urban").unwrap()["mv"];
        assert_eq!(mv.lanes_exponent, 0.0);
    }

    #[test]
    fn test_predict_formula() {
        let expected = (-2.0 + 0.5 * 50000f64.ln() + 0.3 * 0.5f64.ln() + 0.1 * 2f64.ln()).exp();
        assert!(close(sv_coefficient().predict(50000.0, 0.5, 2.0), expected));
    }

    #[test]
    fn test_predict_zero_exposure() {
        let coef = sv_coefficient();
        assert_eq!(coef.predict(0.0, 0.5, 2.0), 0.0);
        assert_eq!(coef.predict(50000.0, 0.0, 2.0), 0.0);
        assert_eq!(coef.predict(50000.0, 0.5, 0.0), 0.0);
        assert_eq!(coef.predict(-1.0, 0.5, 2.0), 0.0);
    }

    #[test]
    fn test_default_profile() {
        let profile = SeverityProfile::default();
        assert!(close(profile.fi_share, 0.40));
        assert!(close(profile.pdo_share, 0.60));
        assert!(close(profile.kabco_shares.total(), 1.0));
        assert_eq!(profile.severity_costs, DEFAULT_SEVERITY_COSTS);
    }

    #[test]
    fn test_profile_zero_shares_reset_to_defaults() {
        let profile = SeverityProfile::new(Kabco::splat(0.0), DEFAULT_SEVERITY_COSTS, None);
        assert!(close(profile.kabco_shares.k, 0.02));
        assert!(close(profile.pdo_share, 0.60));
    }

    #[test]
    fn test_profile_negative_shares_clamped() {
        let raw = Kabco {
            k: -1.0,
            a: 0.0,
            b: 0.0,
            c: 1.0,
            o: 1.0,
        };
        let profile = SeverityProfile::new(raw, DEFAULT_SEVERITY_COSTS, None);
        assert_eq!(profile.kabco_shares.k, 0.0);
        assert!(close(profile.kabco_shares.c, 0.5));
        assert!(close(profile.kabco_shares.o, 0.5));
    }

    #[test]
    fn test_profile_fi_pdo_override_keeps_ratios() {
        let raw = Kabco {
            k: 1.0,
            a: 1.0,
            b: 2.0,
            c: 4.0,
            o: 2.0,
        };
        let profile = SeverityProfile::new(raw, DEFAULT_SEVERITY_COSTS, Some((3.0, 1.0)));
        assert!(close(profile.fi_share, 0.75));
        assert!(close(profile.pdo_share, 0.25));
        assert!(close(profile.kabco_shares.c, 0.75 * 0.5));
        assert!(close(profile.kabco_shares.b / profile.kabco_shares.k, 2.0));
    }

    #[test]
    fn test_profile_fi_override_with_empty_block_splits_equally() {
        let raw = Kabco {
            k: 0.0,
            a: 0.0,
            b: 0.0,
            c: 0.0,
            o: 1.0,
        };
        let profile = SeverityProfile::new(raw, DEFAULT_SEVERITY_COSTS, Some((0.4, 0.6)));
        for level in Severity::FATAL_INJURY {
            assert!(close(profile.kabco_shares[level], 0.1));
        }
        assert!(close(profile.pdo_share, 0.6));
    }

    #[test]
    fn test_profile_invalid_override_ignored() {
        let plain = SeverityProfile::new(DEFAULT_KABCO_SHARES, DEFAULT_SEVERITY_COSTS, None);
        for fi_pdo in [(-0.1, 0.5), (0.0, 0.0), (0.5, -1.0)] {
            let profile = SeverityProfile::new(DEFAULT_KABCO_SHARES, DEFAULT_SEVERITY_COSTS, Some(fi_pdo));
            assert_eq!(profile, plain);
        }
    }

    #[test]
    fn test_profile_from_row_defaults_missing_fields() {
        let model = model();
        let mv = model.severity_profile("freeway", "urban", "mv");
        assert!(close(mv.kabco_shares.o, 0.70));
        assert!(close(mv.fi_share, 0.30));
        assert_eq!(mv.severity_costs, DEFAULT_SEVERITY_COSTS);

        let rural = model.severity_profile("FREEWAY", "rural", "sv");
        assert!(close(rural.fi_share, 0.5));
        assert!(close(rural.kabco_shares.k, 0.125));
        assert_eq!(rural.severity_costs, Kabco::splat(100.0));
    }

    #[test]
    fn test_missing_severity_row_falls_back() {
        let model = model();
        let profile = model.severity_profile("freeway", "urban", "sv");
        assert_eq!(profile, &SeverityProfile::default());
        assert!(close(profile.fi_share, 0.40));
        assert!(close(profile.pdo_share, 0.60));
    }

    #[test]
    fn test_malformed_coefficient_fails_load() {
        let bad = "facility,area_type,collision_type,intercept,aadt_exponent,length_exponent\nfreeway,urban,sv,abc,0.5,1.0\n";
        let err = SpfModel::from_csv_str(bad, SEVERITY, HsmConfig::default()).unwrap_err();
        assert!(matches!(err, HsmError::Parse { ref field, .. } if field == "intercept"));
    }

    #[test]
    fn test_missing_required_coefficient_fails_load() {
        let bad = "facility,area_type,collision_type,intercept,aadt_exponent\nfreeway,urban,sv,-2,0.5\n";
        let err = SpfModel::from_csv_str(bad, SEVERITY, HsmConfig::default()).unwrap_err();
        assert!(matches!(err, HsmError::MissingField { ref field, .. } if field == "length_exponent"));
    }

    #[test]
    fn test_malformed_severity_fails_load() {
        let bad = "facility,area_type,collision_type,k_share\nfreeway,urban,sv,lots\n";
        let err = SpfModel::from_csv_str(COEFFS, bad, HsmConfig::default()).unwrap_err();
        assert!(matches!(err, HsmError::Parse { ref field, .. } if field == "k_share"));
    }

    #[test]
    fn test_duplicate_coefficients_first_wins() {
        let dup = format!("{COEFFS}freeway,urban,sv,9.0,0.5,0.3,0.1\n");
        let model = SpfModel::from_csv_str(&dup, SEVERITY, HsmConfig::default()).unwrap();
        assert_eq!(model.select_coefficients("freeway", "urban").unwrap()["sv"].intercept, -2.0);
    }

    #[test]
    fn test_missing_coefficients_error() {
        let err = model()
            .predict("freeway", "suburban", &one_direction(50000.0, 0.5, 2.0))
            .unwrap_err();
        assert!(matches!(
            err,
            HsmError::MissingCoefficients { ref facility, ref area_type }
                if facility == "freeway" && area_type == "suburban"
        ));
    }

    #[test]
    fn test_predict_scenario_single_direction() {
        let model = model();
        let result = model
            .predict("FREEWAY", "Urban", &one_direction(50000.0, 0.5, 2.0))
            .unwrap();

        let base = (-2.0 + 0.5 * 50000f64.ln() + 0.3 * 0.5f64.ln() + 0.1 * 2f64.ln()).exp();
        let sv = result.collision("sv").unwrap();
        assert!(close(sv.total, base));
        assert!(close(sv.fi, 0.40 * base));
        assert!(close(sv.pdo, 0.60 * base));
        assert!(close(sv.fi + sv.pdo, sv.total));
        assert!(close(sv.kabco.total(), sv.total));
        assert!(close(sv.economic_loss.by_severity.total(), sv.economic_loss.total));

        assert!(close(
            result.total_all_sev,
            result.collision_types.values().map(|c| c.total).sum::<f64>()
        ));
        assert!(close(result.total_fi + result.total_pdo, result.total_all_sev));
        assert!(close(result.k_overdispersion, 0.4 * 0.5f64.powf(-0.5)));
        assert_eq!(result.calibration_c, 1.0);
    }

    #[test]
    fn test_predict_applies_calibration_and_cmf() {
        let mut config = HsmConfig {
            calibration_factor: 2.0,
            default_cmf: 0.5,
            ..HsmConfig::default()
        };
        config.set_cmf("sv", 0.9);
        let calibrated = SpfModel::from_csv_str(COEFFS, SEVERITY, config).unwrap();
        let plain = model();
        let inputs = one_direction(40000.0, 1.0, 3.0);

        let a = calibrated.predict("freeway", "urban", &inputs).unwrap();
        let b = plain.predict("freeway", "urban", &inputs).unwrap();
        assert!(close(a.collision("sv").unwrap().total, b.collision("sv").unwrap().total * 1.8));
        assert!(close(a.collision("mv").unwrap().total, b.collision("mv").unwrap().total * 1.0));
        assert_eq!(a.calibration_c, 2.0);
    }

    #[test]
    fn test_predict_no_directions_keeps_shape() {
        let result = model()
            .predict("freeway", "urban", &BTreeMap::new())
            .unwrap();
        assert_eq!(
            result.collision_types.keys().collect::<Vec<_>>(),
            vec!["mv", "sv"]
        );
        assert_eq!(result.total_all_sev, 0.0);
        assert!(close(result.k_overdispersion, 0.4 * 1e-3f64.powf(-0.5)));
    }

    #[test]
    fn test_predict_sums_directions() {
        let model = model();
        let one = model
            .predict("freeway", "urban", &one_direction(30000.0, 0.4, 2.0))
            .unwrap();
        let mut both = one_direction(30000.0, 0.4, 2.0);
        let first = both[&1];
        both.insert(2, first);
        let two = model.predict("freeway", "urban", &both).unwrap();
        assert!(close(two.total_all_sev, 2.0 * one.total_all_sev));
        assert!(close(two.k_overdispersion, one.k_overdispersion));
    }

    #[test]
    fn test_predict_is_deterministic() {
        let model = model();
        let mut inputs = one_direction(61234.5, 0.37, 3.0);
        inputs.insert(
            2,
            DirectionalInput {
                lane_count: 2.0,
                segment_length_miles: 0.41,
                aadt: 48000.0,
            },
        );
        let a = model.predict("freeway", "urban", &inputs).unwrap();
        let b = model.predict("freeway", "urban", &inputs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_builtin_tables_load() {
        let model = SpfModel::builtin(HsmConfig::default()).unwrap();
        assert!(model.select_coefficients("freeway", "urban").is_ok());
        assert!(model.select_coefficients("freeway", "rural").is_ok());
        assert!(model.sites().count() >= 2);
    }

    #[test]
    fn test_from_files_matches_builtin() {
        let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        let from_files = SpfModel::from_files(
            &data.join("freeway_spf.csv"),
            &data.join("severity_distribution.csv"),
            HsmConfig::default(),
        )
        .unwrap();
        let builtin = SpfModel::builtin(HsmConfig::default()).unwrap();
        let inputs = one_direction(45000.0, 0.25, 3.0);
        assert_eq!(
            from_files.predict("freeway", "rural", &inputs).unwrap(),
            builtin.predict("freeway", "rural", &inputs).unwrap()
        );
        assert!(close(
            from_files.severity_profile("freeway", "rural", "mv").fi_share,
            0.32
        ));
    }

    #[test]
    fn test_from_files_missing_path() {
        let err = SpfModel::from_files(
            Path::new("/nonexistent/spf.csv"),
            Path::new("/nonexistent/severity.csv"),
            HsmConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HsmError::MissingFile(_)));
    }

    #[test]
    fn test_huge_shares_still_normalize() {
        let huge = Kabco::splat(1e308);
        let profile = SeverityProfile::new(huge, DEFAULT_SEVERITY_COSTS, None);
        assert!(close(profile.kabco_shares.total(), 1.0));
        assert!(close(profile.kabco_shares.k, 0.2));
        assert!(close(profile.fi_share + profile.pdo_share, 1.0));

        let overridden = SeverityProfile::new(huge, DEFAULT_SEVERITY_COSTS, Some((1e308, 1e308)));
        assert!(overridden.kabco_shares.iter().all(|(_, v)| v.is_finite() && v >= 0.0));
        assert!(close(overridden.fi_share, 0.5));
        assert!(close(overridden.pdo_share, 0.5));
    }

    #[test]
    fn test_huge_severity_row_predicts_consistently() {
        let severity = "facility,area_type,collision_type,k_share,a_share,b_share,c_share,o_share\n\
                        freeway,urban,sv,1e308,1e308,1e308,1e308,1e308\n";
        let model = SpfModel::from_csv_str(COEFFS, severity, HsmConfig::default()).unwrap();
        let result = model
            .predict("freeway", "urban", &one_direction(45000.0, 0.25, 3.0))
            .unwrap();
        let sv = &result.collision_types["sv"];
        assert!(sv.total > 0.0);
        assert!(close(sv.fi + sv.pdo, sv.total));
        assert!(close(result.severity_breakdown.total(), result.total_all_sev));
    }

    #[test]
    fn test_new_normalizes_keys() {
        let coef = SpfCoefficient {
            facility: " Freeway ".into(),
            area_type: "URBAN".into(),
            collision_type: "SV".into(),
            intercept: -5.0,
            aadt_exponent: 0.8,
            length_exponent: 1.0,
            lanes_exponent: 0.0,
        };
        let key = ("FREEWAY".to_string(), "Urban".to_string(), " Sv".to_string());
        let profile = SeverityProfile::new(DEFAULT_KABCO_SHARES, DEFAULT_SEVERITY_COSTS, Some((0.4, 0.6)));
        let model = SpfModel::new([coef], [(key, profile)], HsmConfig::default());

        let result = model
            .predict("freeway", "urban", &one_direction(45000.0, 0.25, 3.0))
            .unwrap();
        assert!(result.collision_types["sv"].total > 0.0);
        assert!(close(model.severity_profile("freeway", "urban", "sv").fi_share, 0.4));
    }
}
