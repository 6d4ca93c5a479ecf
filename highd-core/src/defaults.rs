//! Built-in data tables, embedded at compile time via `include_str!`.
//!
//! Used when no coefficient, severity, or AADT factor file is configured.

use crate::config::AadtFactorConfig;
use crate::types::Result;

/// Freeway SPF coefficients (urban and rural, single- and multi-vehicle).
pub const FREEWAY_SPF_CSV: &str = include_str!("../data/freeway_spf.csv");

/// KABCO severity shares and crash costs matching `FREEWAY_SPF_CSV`.
pub const SEVERITY_DISTRIBUTION_CSV: &str = include_str!("../data/severity_distribution.csv");

/// Day-of-week, month-of-year, and hour-of-day factors. Hour shares are the
/// hour's volume relative to the average hour of the day.
pub const AADT_FACTORS_JSON: &str = include_str!("../data/aadt_factors.json");

/// Parse the built-in AADT factors.
pub fn aadt_factors() -> Result<AadtFactorConfig> {
    AadtFactorConfig::from_json_str(AADT_FACTORS_JSON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_aadt_factors() {
        let factors = aadt_factors().unwrap();
        assert_eq!(factors.weekday_factors.len(), 7);
        assert_eq!(factors.month_factors.len(), 12);
        assert_eq!(factors.hour_shares.len(), 24);
        let mean: f64 = factors.hour_shares.values().sum::<f64>() / 24.0;
        assert!((mean - 1.0).abs() < 1e-9);
    }
}
