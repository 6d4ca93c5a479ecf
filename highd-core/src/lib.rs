//! highd-core: highD recording analytics and HSM crash prediction.
//!
//! Loads highD recordings, derives lane structure, traffic flow and AADT,
//! and predicts annual crash frequency by collision type and KABCO severity
//! with calibrated safety performance functions. Prediction itself is pure;
//! file access happens only in the loaders.

pub mod aadt;
pub mod config;
pub mod defaults;
pub mod flow;
pub mod prediction;
pub mod recording;
pub mod spf;
pub mod structure;
pub mod table;
pub mod types;

// Re-export commonly used types at crate root
pub use aadt::{estimate_aadt, AadtMethod, AadtSummary};
pub use config::{AadtFactorConfig, Config, HsmConfig, OverdispersionConfig, PipelineConfig};
pub use flow::{summarize_flow, FlowSummary, VehicleClass};
pub use prediction::{CollisionPrediction, EconomicLoss, PredictionResult};
pub use recording::{iter_recordings, load_recording, RecordingData, RecordingMeta};
pub use spf::{DirectionalInput, SeverityProfile, SpfCoefficient, SpfModel};
pub use structure::{analyze_structure, StructureSummary};
pub use types::*;
