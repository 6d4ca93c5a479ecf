//! Run configuration: HSM calibration, AADT factors, pipeline settings.
//!
//! Settings are layered: built-in defaults, then the user config file at
//! `~/.highd-hsm/config.yaml`, then command-line flags (applied by the CLI).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{normalize_key, HsmError, Result};

/// Length floor (miles) for the overdispersion power law.
const MIN_OVERDISPERSION_LENGTH: f64 = 1e-3;

// ---------------------------------------------------------------------------
// HSM configuration
// ---------------------------------------------------------------------------

/// Length-dependent overdispersion `k = alpha * L^beta`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverdispersionConfig {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for OverdispersionConfig {
    fn default() -> Self {
        OverdispersionConfig {
            alpha: 0.4,
            beta: -0.5,
        }
    }
}

impl OverdispersionConfig {
    /// Overdispersion parameter for a segment of `length_miles`.
    ///
    /// Lengths below 0.001 mi are floored so a zero or negative length never
    /// produces an infinite or NaN value.
    pub fn k_for_length(&self, length_miles: f64) -> f64 {
        let length = length_miles.max(MIN_OVERDISPERSION_LENGTH);
        self.alpha * length.powf(self.beta)
    }
}

/// Calibration and crash modification factors applied to every prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HsmConfig {
    pub calibration_factor: f64,
    pub default_cmf: f64,
    /// Collision type (normalized) → CMF.
    pub cmf_overrides: BTreeMap<String, f64>,
    pub overdispersion: OverdispersionConfig,
}

impl Default for HsmConfig {
    fn default() -> Self {
        HsmConfig {
            calibration_factor: 1.0,
            default_cmf: 1.0,
            cmf_overrides: BTreeMap::new(),
            overdispersion: OverdispersionConfig::default(),
        }
    }
}

impl HsmConfig {
    /// CMF for a collision type: the override if one exists, else the default.
    /// Override keys match case- and whitespace-insensitively.
    pub fn cmf_for_key(&self, key: &str) -> f64 {
        let key = normalize_key(key);
        self.cmf_overrides
            .get(&key)
            .or_else(|| {
                self.cmf_overrides
                    .iter()
                    .find(|(k, _)| normalize_key(k) == key)
                    .map(|(_, v)| v)
            })
            .copied()
            .unwrap_or(self.default_cmf)
    }

    /// Set a CMF override. The key is normalized.
    pub fn set_cmf(&mut self, key: &str, value: f64) {
        self.cmf_overrides.insert(normalize_key(key), value);
    }
}

// ---------------------------------------------------------------------------
// AADT factors
// ---------------------------------------------------------------------------

/// Temporal adjustment factors for converting a short count into AADT.
///
/// JSON layout: `{"F_DOW": {"Mon": 1.02, ...}, "F_MOY": {"1": 1.1, ...},
/// "HOD_share": {"0": 0.01, ...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AadtFactorConfig {
    #[serde(rename = "F_DOW", default)]
    pub weekday_factors: BTreeMap<String, f64>,
    #[serde(rename = "F_MOY", default)]
    pub month_factors: BTreeMap<String, f64>,
    #[serde(rename = "HOD_share", default)]
    pub hour_shares: BTreeMap<String, f64>,
}

impl AadtFactorConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HsmError::MissingFile(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Day-of-week factor keyed by abbreviation (`Mon` .. `Sun`).
    pub fn factor_for_weekday(&self, weekday: &str) -> f64 {
        self.weekday_factors.get(weekday).copied().unwrap_or(1.0)
    }

    /// Month-of-year factor keyed by month number (1-12).
    pub fn factor_for_month(&self, month: u32) -> f64 {
        self.month_factors
            .get(&month.to_string())
            .copied()
            .unwrap_or(1.0)
    }

    /// Share of daily traffic observed in the given hour (0-23).
    pub fn share_for_hour(&self, hour: u32) -> f64 {
        self.hour_shares
            .get(&hour.to_string())
            .copied()
            .unwrap_or(1.0)
    }
}

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

/// Site classification and input/output options for a processing run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub facility: String,
    pub area_type: String,
    pub aadt_factors_path: Option<PathBuf>,
    pub coefficients_path: Option<PathBuf>,
    pub severity_path: Option<PathBuf>,
    pub output_reports: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            facility: "freeway".into(),
            area_type: "urban".into(),
            aadt_factors_path: None,
            coefficients_path: None,
            severity_path: None,
            output_reports: true,
        }
    }
}

impl PipelineConfig {
    pub fn new(facility: &str, area_type: &str) -> Self {
        PipelineConfig {
            facility: normalize_key(facility),
            area_type: normalize_key(area_type),
            ..PipelineConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// User config file
// ---------------------------------------------------------------------------

/// Full configuration structure stored in the user config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub hsm: HsmConfig,
}

/// Get the config directory path (`~/.highd-hsm/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".highd-hsm")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `path`.
///
/// Returns the default config if the file doesn't exist or can't be read.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) => {
            tracing::warn!("could not read {}: {e}; using defaults", path.display());
            Config::default()
        }
    }
}

/// Save config to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| HsmError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| HsmError::Config(e.to_string()))?;
    Ok(path.to_path_buf())
}

/// Parse simple YAML-like config text. Unknown keys and unparsable values
/// are ignored, keeping the default.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = if val.is_empty() {
                Some(key.to_string())
            } else {
                None
            };
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match section {
            "pipeline" => apply_pipeline_key(&mut config.pipeline, key, val),
            "hsm" => apply_hsm_key(&mut config.hsm, key, val),
            "cmf" => {
                if let Some(v) = parse_float_value(val) {
                    config.hsm.set_cmf(key, v);
                }
            }
            _ => {}
        }
    }

    config
}

fn apply_pipeline_key(pipeline: &mut PipelineConfig, key: &str, val: &str) {
    match key {
        "facility" => {
            if let Some(v) = parse_string_value(val) {
                pipeline.facility = normalize_key(&v);
            }
        }
        "area_type" => {
            if let Some(v) = parse_string_value(val) {
                pipeline.area_type = normalize_key(&v);
            }
        }
        "aadt_factors" => pipeline.aadt_factors_path = parse_string_value(val).map(PathBuf::from),
        "coefficients" => pipeline.coefficients_path = parse_string_value(val).map(PathBuf::from),
        "severity" => pipeline.severity_path = parse_string_value(val).map(PathBuf::from),
        "reports" => {
            if let Some(v) = parse_bool_value(val) {
                pipeline.output_reports = v;
            }
        }
        _ => {}
    }
}

fn apply_hsm_key(hsm: &mut HsmConfig, key: &str, val: &str) {
    let Some(v) = parse_float_value(val) else {
        return;
    };
    match key {
        "calibration_factor" => hsm.calibration_factor = v,
        "default_cmf" => hsm.default_cmf = v,
        "alpha" => hsm.overdispersion.alpha = v,
        "beta" => hsm.overdispersion.beta = v,
        _ => {}
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

fn parse_bool_value(val: &str) -> Option<bool> {
    match val {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn path_value(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!("\"{}\"", p.display()),
        None => "null".into(),
    }
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let pipeline = &config.pipeline;
    let hsm = &config.hsm;
    let mut lines = vec!["# highd-hsm configuration".to_string(), String::new()];

    lines.push("pipeline:".into());
    lines.push(format!("  facility: \"{}\"", pipeline.facility));
    lines.push(format!("  area_type: \"{}\"", pipeline.area_type));
    lines.push(format!("  aadt_factors: {}", path_value(&pipeline.aadt_factors_path)));
    lines.push(format!("  coefficients: {}", path_value(&pipeline.coefficients_path)));
    lines.push(format!("  severity: {}", path_value(&pipeline.severity_path)));
    lines.push(format!("  reports: {}", pipeline.output_reports));
    lines.push(String::new());

    lines.push("hsm:".into());
    lines.push(format!("  calibration_factor: {}", hsm.calibration_factor));
    lines.push(format!("  default_cmf: {}", hsm.default_cmf));
    lines.push(format!("  alpha: {}", hsm.overdispersion.alpha));
    lines.push(format!("  beta: {}", hsm.overdispersion.beta));
    lines.push(String::new());

    lines.push("cmf:".into());
    if hsm.cmf_overrides.is_empty() {
        lines.push("  # sv: 0.9".into());
    }
    for (key, value) in &hsm.cmf_overrides {
        lines.push(format!("  {key}: {value}"));
    }

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.facility, "freeway");
        assert_eq!(config.pipeline.area_type, "urban");
        assert!(config.pipeline.output_reports);
        assert_eq!(config.hsm.calibration_factor, 1.0);
        assert_eq!(config.hsm.overdispersion.alpha, 0.4);
        assert_eq!(config.hsm.overdispersion.beta, -0.5);
    }

    #[test]
    fn test_cmf_for_key() {
        let mut hsm = HsmConfig {
            default_cmf: 0.95,
            ..HsmConfig::default()
        };
        hsm.set_cmf(" SV ", 0.8);
        assert_eq!(hsm.cmf_for_key("sv"), 0.8);
        assert_eq!(hsm.cmf_for_key("mv"), 0.95);
    }

    #[test]
    fn test_cmf_for_key_unnormalized_override() {
        let mut hsm = HsmConfig::default();
        hsm.cmf_overrides.insert("SV".into(), 0.7);
        assert_eq!(hsm.cmf_for_key("sv"), 0.7);
        assert_eq!(hsm.cmf_for_key(" Sv "), 0.7);
        assert_eq!(hsm.cmf_for_key("mv"), 1.0);
    }

    #[test]
    fn test_overdispersion() {
        let od = OverdispersionConfig::default();
        assert!((od.k_for_length(1.0) - 0.4).abs() < 1e-12);
        assert!((od.k_for_length(0.25) - 0.8).abs() < 1e-12);
        // Zero and negative lengths are floored, never infinite.
        let floor = od.k_for_length(1e-3);
        assert_eq!(od.k_for_length(0.0), floor);
        assert_eq!(od.k_for_length(-5.0), floor);
        assert!(floor.is_finite());
    }

    #[test]
    fn test_aadt_factors_from_json() {
        let factors = AadtFactorConfig::from_json_str(
            r#"{"F_DOW": {"Mon": 1.1}, "F_MOY": {"7": 0.9}, "HOD_share": {"8": 0.07}}"#,
        )
        .unwrap();
        assert_eq!(factors.factor_for_weekday("Mon"), 1.1);
        assert_eq!(factors.factor_for_weekday("Sun"), 1.0);
        assert_eq!(factors.factor_for_month(7), 0.9);
        assert_eq!(factors.factor_for_month(1), 1.0);
        assert_eq!(factors.share_for_hour(8), 0.07);
        assert_eq!(factors.share_for_hour(9), 1.0);
    }

    #[test]
    fn test_aadt_factors_partial_json() {
        let factors = AadtFactorConfig::from_json_str(r#"{"F_DOW": {"Tue": 0.98}}"#).unwrap();
        assert!(factors.month_factors.is_empty());
        assert!(AadtFactorConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_aadt_factor_file_missing() {
        assert!(matches!(
            AadtFactorConfig::from_file(Path::new("/nonexistent/f.json")),
            Err(HsmError::MissingFile(_))
        ));
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
pipeline:
  facility: "Freeway"
  area_type: "rural"
  aadt_factors: "/tmp/factors.json"
  coefficients: null
  reports: false

hsm:
  calibration_factor: 1.25
  default_cmf: 0.9
  alpha: 0.5
  beta: -0.25

cmf:
  SV: 0.8
  mv: 1.1
"#;
        let config = parse_config(text);
        assert_eq!(config.pipeline.facility, "freeway");
        assert_eq!(config.pipeline.area_type, "rural");
        assert_eq!(
            config.pipeline.aadt_factors_path,
            Some(PathBuf::from("/tmp/factors.json"))
        );
        assert!(config.pipeline.coefficients_path.is_none());
        assert!(!config.pipeline.output_reports);
        assert_eq!(config.hsm.calibration_factor, 1.25);
        assert_eq!(config.hsm.default_cmf, 0.9);
        assert_eq!(config.hsm.overdispersion.alpha, 0.5);
        assert_eq!(config.hsm.overdispersion.beta, -0.25);
        assert_eq!(config.hsm.cmf_for_key("sv"), 0.8);
        assert_eq!(config.hsm.cmf_for_key("mv"), 1.1);
    }

    #[test]
    fn test_parse_config_bad_values_keep_defaults() {
        let text = "hsm:\n  calibration_factor: lots\n  alpha: ~\npipeline:\n  reports: maybe\n";
        let config = parse_config(text);
        assert_eq!(config.hsm.calibration_factor, 1.0);
        assert_eq!(config.hsm.overdispersion.alpha, 0.4);
        assert!(config.pipeline.output_reports);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.pipeline.area_type = "rural".into();
        config.pipeline.severity_path = Some(PathBuf::from("sev.csv"));
        config.hsm.calibration_factor = 1.5;
        config.hsm.set_cmf("sv", 0.75);

        let parsed = parse_config(&serialize_config(&config));
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let config = load_config(Path::new("/nonexistent/highd-hsm/config.yaml"));
        assert_eq!(config, Config::default());
    }
}
