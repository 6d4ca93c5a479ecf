//! Roadway structure: lane counts and lane widths per driving direction.
//!
//! Lane counts come from the lane marking positions in the recording
//! metadata (n markings bound n-1 lanes). When a direction has no usable
//! markings, the distinct `laneId`s seen in `tracksMeta.csv` for that
//! direction are counted instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::recording::{robust_segment_length, RecordingData};
use crate::table::Row;

/// Summary statistics of the gaps between adjacent lane markings (meters).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LaneWidthStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DirectionStructure {
    pub lane_count: u32,
    pub lane_widths: LaneWidthStats,
}

/// Roadway structure derived from one recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub recording_id: String,
    pub speed_limit_kmh: f64,
    pub duration_sec: f64,
    /// ISO-8601 recording start, if known.
    pub timestamp: Option<String>,
    pub segment_length_m: f64,
    pub directions: BTreeMap<u8, DirectionStructure>,
    pub lane_count_total: u32,
    pub lane_count_mean: f64,
}

/// Width statistics over consecutive marking gaps. Fewer than two markings
/// yields all zeros.
pub fn lane_width_stats(markings: &[f64]) -> LaneWidthStats {
    if markings.len() < 2 {
        return LaneWidthStats::default();
    }
    let mut widths: Vec<f64> = markings.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    widths.sort_by(f64::total_cmp);

    let n = widths.len();
    let mean = widths.iter().sum::<f64>() / n as f64;
    let variance = widths.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        widths[n / 2]
    } else {
        (widths[n / 2 - 1] + widths[n / 2]) / 2.0
    };

    LaneWidthStats {
        count: n,
        mean,
        std: variance.sqrt(),
        median,
        min: widths[0],
        max: widths[n - 1],
    }
}

pub fn lane_count_from_markings(markings: &[f64]) -> u32 {
    markings.len().saturating_sub(1) as u32
}

/// Distinct lane ids observed for vehicles driving in `direction`.
pub fn lane_count_from_lane_ids(tracks_meta: &[Row], direction: u8) -> u32 {
    let lanes: BTreeSet<i64> = tracks_meta
        .iter()
        .filter(|row| {
            row.get("drivingDirection")
                .and_then(|d| d.parse::<f64>().ok())
                .is_some_and(|d| d as i64 == direction as i64)
        })
        .filter_map(|row| row.get("laneId").and_then(|l| l.parse::<f64>().ok()))
        .map(|l| l as i64)
        .collect();
    lanes.len() as u32
}

/// Analyze lane structure. Direction 1 uses the lower markings, direction 2
/// the upper markings.
pub fn analyze_structure(recording: &RecordingData) -> StructureSummary {
    let meta = &recording.meta;
    let direction_markings: [(u8, &[f64]); 2] = [
        (1, &meta.lower_lane_markings),
        (2, &meta.upper_lane_markings),
    ];

    let mut directions = BTreeMap::new();
    for (direction, markings) in direction_markings {
        let mut lane_count = lane_count_from_markings(markings);
        if lane_count == 0 {
            let fallback = lane_count_from_lane_ids(&recording.tracks_meta, direction);
            if fallback > 0 {
                tracing::debug!(
                    "recording {}: direction {direction} has no lane markings, using {fallback} lane ids",
                    meta.recording_id
                );
                lane_count = fallback;
            }
        }
        directions.insert(
            direction,
            DirectionStructure {
                lane_count,
                lane_widths: lane_width_stats(markings),
            },
        );
    }

    let lane_counts: Vec<u32> = directions
        .values()
        .map(|d| d.lane_count)
        .filter(|&c| c > 0)
        .collect();
    let lane_count_total: u32 = lane_counts.iter().sum();
    let lane_count_mean = if lane_counts.is_empty() {
        0.0
    } else {
        lane_count_total as f64 / lane_counts.len() as f64
    };

    StructureSummary {
        recording_id: meta.recording_id.clone(),
        speed_limit_kmh: meta.speed_limit_kmh(),
        duration_sec: meta.duration,
        timestamp: meta
            .timestamp
            .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
        segment_length_m: robust_segment_length(&recording.tracks),
        directions,
        lane_count_total,
        lane_count_mean,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
