//! End-to-end processing of highD recordings.
//!
//! For each recording: load → structure → flow → AADT → SPF prediction,
//! then write the JSON results (and optionally the Markdown/HTML reports)
//! into the recording's output directory.

use std::collections::BTreeMap;
use std::path::Path;

use highd_core::{
    analyze_structure, defaults, estimate_aadt, iter_recordings, load_recording, summarize_flow,
    AadtFactorConfig, AadtSummary, DirectionalInput, FlowSummary, HsmConfig, PipelineConfig,
    PredictionResult, Result, SpfModel, StructureSummary,
};

use crate::report;

const METERS_PER_MILE: f64 = 1609.344;

pub const STRUCTURE_JSON: &str = "structure.json";
pub const FLOW_JSON: &str = "flow.json";
pub const AADT_JSON: &str = "aadt.json";
pub const PREDICTION_JSON: &str = "hsm_prediction.json";

/// Everything derived from one recording.
#[derive(Debug, Clone)]
pub struct RecordingOutputs {
    pub structure: StructureSummary,
    pub flow: FlowSummary,
    pub aadt: AadtSummary,
    pub prediction: PredictionResult,
}

/// Holds the loaded model and factor tables so they are read once per run.
#[derive(Debug, Clone)]
pub struct RecordingProcessor {
    pipeline: PipelineConfig,
    aadt_factors: Option<AadtFactorConfig>,
    model: SpfModel,
}

impl RecordingProcessor {
    pub fn new(
        pipeline: PipelineConfig,
        aadt_factors: Option<AadtFactorConfig>,
        model: SpfModel,
    ) -> Self {
        RecordingProcessor {
            pipeline,
            aadt_factors,
            model,
        }
    }

    /// Load the SPF tables and AADT factors named by `pipeline`, falling back
    /// to the built-in tables for any that are not set.
    pub fn from_config(pipeline: PipelineConfig, hsm: HsmConfig) -> Result<Self> {
        let model = SpfModel::load(
            pipeline.coefficients_path.as_deref(),
            pipeline.severity_path.as_deref(),
            hsm,
        )?;
        tracing::debug!(
            "SPF sites: {}",
            model
                .sites()
                .map(|(facility, area)| format!("{facility}/{area}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let aadt_factors = match pipeline.aadt_factors_path.as_deref() {
            Some(path) => {
                tracing::info!("AADT factors from {}", path.display());
                AadtFactorConfig::from_file(path)?
            }
            None => {
                tracing::info!(
                    "no AADT factor file configured; using built-in factors (--baseline-aadt for 24 h expansion)"
                );
                defaults::aadt_factors()?
            }
        };
        Ok(RecordingProcessor::new(pipeline, Some(aadt_factors), model))
    }

    /// Drop the temporal factors so AADT is the plain 24-hour expansion.
    pub fn without_aadt_factors(mut self) -> Self {
        self.aadt_factors = None;
        self
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// Process one recording directory into `out_dir`.
    pub fn process(&self, recording_dir: &Path, out_dir: &Path) -> Result<RecordingOutputs> {
        let recording = load_recording(recording_dir)?;
        tracing::info!(
            "processing recording {} (AADT method: {})",
            recording.meta.recording_id,
            if self.aadt_factors.is_some() { "factored" } else { "baseline" }
        );

        std::fs::create_dir_all(out_dir)?;

        let structure = analyze_structure(&recording);
        let flow = summarize_flow(&recording);
        let aadt = estimate_aadt(&flow, recording.meta.timestamp, self.aadt_factors.as_ref());

        let inputs = directional_inputs(&structure, &aadt);
        let prediction =
            self.model
                .predict(&self.pipeline.facility, &self.pipeline.area_type, &inputs)?;

        let outputs = RecordingOutputs {
            structure,
            flow,
            aadt,
            prediction,
        };

        report::write_json(&out_dir.join(STRUCTURE_JSON), &outputs.structure)?;
        report::write_json(&out_dir.join(FLOW_JSON), &outputs.flow)?;
        report::write_json(&out_dir.join(AADT_JSON), &outputs.aadt)?;
        report::write_json(&out_dir.join(PREDICTION_JSON), &outputs.prediction)?;

        if self.pipeline.output_reports {
            report::write_markdown_report(out_dir, &outputs)?;
            report::write_html_report(out_dir, &outputs)?;
        }

        tracing::info!(
            "recording {}: {:.3} crashes/yr written to {}",
            outputs.structure.recording_id,
            outputs.prediction.total_all_sev,
            out_dir.display()
        );
        Ok(outputs)
    }
}

/// Per-direction SPF inputs. Every direction with structure info takes part;
/// lane counts are floored at one and a direction without flow gets zero
/// AADT.
pub fn directional_inputs(
    structure: &StructureSummary,
    aadt: &AadtSummary,
) -> BTreeMap<u8, DirectionalInput> {
    let segment_length_miles = structure.segment_length_m.max(0.0) / METERS_PER_MILE;
    structure
        .directions
        .iter()
        .map(|(&direction, info)| {
            let input = DirectionalInput {
                lane_count: info.lane_count.max(1) as f64,
                segment_length_miles,
                aadt: aadt.directions.get(&direction).map_or(0.0, |d| d.aadt),
            };
            (direction, input)
        })
        .collect()
}

/// Process every recording under `data_root` into `out_root/<dir name>`.
/// The first failing recording aborts the run.
pub fn process_all(
    data_root: &Path,
    out_root: &Path,
    processor: &RecordingProcessor,
) -> Result<Vec<(String, RecordingOutputs)>> {
    std::fs::create_dir_all(out_root)?;

    let recordings = iter_recordings(data_root)?;
    if recordings.is_empty() {
        tracing::warn!("no recordings found under {}", data_root.display());
    }

    let mut results = Vec::with_capacity(recordings.len());
    for recording_dir in recordings {
        let name = recording_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outputs = processor.process(&recording_dir, &out_root.join(&name))?;
        results.push((name, outputs));
    }
    Ok(results)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
