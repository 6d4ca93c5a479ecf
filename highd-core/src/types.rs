//! Shared types, error enum, and KABCO severity containers for highd-core.

use std::ops::{Index, IndexMut};
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// All errors produced by highd-core.
#[derive(Debug, Error)]
pub enum HsmError {
    #[error("parse error in {context}: field '{field}' has invalid value '{value}'")]
    Parse {
        context: String,
        field: String,
        value: String,
    },
    #[error("missing field in {context}: '{field}'")]
    MissingField { context: String, field: String },
    #[error("no SPF coefficients for facility={facility}, area={area_type}")]
    MissingCoefficients { facility: String, area_type: String },
    #[error("missing file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("recording error: {0}")]
    Recording(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HsmError>;

// ---------------------------------------------------------------------------
// KABCO severity scale
// ---------------------------------------------------------------------------

/// Crash severity level on the KABCO scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fatal.
    K,
    /// Suspected serious injury.
    A,
    /// Suspected minor injury.
    B,
    /// Possible injury.
    C,
    /// Property damage only.
    O,
}

impl Severity {
    /// All levels in KABCO order.
    pub const ALL: [Severity; 5] = [
        Severity::K,
        Severity::A,
        Severity::B,
        Severity::C,
        Severity::O,
    ];

    /// The four fatal-and-injury levels.
    pub const FATAL_INJURY: [Severity; 4] = [Severity::K, Severity::A, Severity::B, Severity::C];

    /// Lowercase key used in tabular files and JSON output.
    pub fn key(self) -> &'static str {
        match self {
            Severity::K => "k",
            Severity::A => "a",
            Severity::B => "b",
            Severity::C => "c",
            Severity::O => "o",
        }
    }

    pub fn is_fatal_injury(self) -> bool {
        self != Severity::O
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key().to_ascii_uppercase())
    }
}

/// One value per KABCO level. Serializes as `{"k": .., "a": .., ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Kabco<T> {
    pub k: T,
    pub a: T,
    pub b: T,
    pub c: T,
    pub o: T,
}

impl<T: Copy> Kabco<T> {
    /// Same value for every level.
    pub const fn splat(value: T) -> Self {
        Kabco {
            k: value,
            a: value,
            b: value,
            c: value,
            o: value,
        }
    }

    /// Iterate `(level, value)` pairs in KABCO order.
    pub fn iter(&self) -> impl Iterator<Item = (Severity, T)> + '_ {
        Severity::ALL.into_iter().map(move |s| (s, self[s]))
    }

    /// Apply `f` to every level.
    pub fn map<U>(&self, mut f: impl FnMut(Severity, T) -> U) -> Kabco<U> {
        Kabco {
            k: f(Severity::K, self.k),
            a: f(Severity::A, self.a),
            b: f(Severity::B, self.b),
            c: f(Severity::C, self.c),
            o: f(Severity::O, self.o),
        }
    }
}

impl Kabco<f64> {
    /// Sum over all five levels.
    pub fn total(&self) -> f64 {
        self.k + self.a + self.b + self.c + self.o
    }

    /// Sum over K, A, B, C.
    pub fn fatal_injury(&self) -> f64 {
        self.iter()
            .filter(|(level, _)| level.is_fatal_injury())
            .map(|(_, v)| v)
            .sum()
    }
}

impl<T> Index<Severity> for Kabco<T> {
    type Output = T;

    fn index(&self, level: Severity) -> &T {
        match level {
            Severity::K => &self.k,
            Severity::A => &self.a,
            Severity::B => &self.b,
            Severity::C => &self.c,
            Severity::O => &self.o,
        }
    }
}

impl<T> IndexMut<Severity> for Kabco<T> {
    fn index_mut(&mut self, level: Severity) -> &mut T {
        match level {
            Severity::K => &mut self.k,
            Severity::A => &mut self.a,
            Severity::B => &mut self.b,
            Severity::C => &mut self.c,
            Severity::O => &mut self.o,
        }
    }
}

// ---------------------------------------------------------------------------
// Key normalization
// ---------------------------------------------------------------------------

/// Normalize a facility / area type / collision type key: trimmed, lowercase.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
