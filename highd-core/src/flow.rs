//! Traffic flow per driving direction: vehicle counts, hourly flow rate,
//! class mix, a 1-minute arrival series and mean speed.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::recording::RecordingData;
use crate::table::Row;

const BIN_SECONDS: f64 = 60.0;

/// Vehicle class as labelled in `tracksMeta.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Truck,
    Unknown,
}

impl VehicleClass {
    /// Accepts `Car`/`Truck` and the numeric codes `0`/`1`, case-insensitive.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "car" | "0" => VehicleClass::Car,
            "truck" | "1" => VehicleClass::Truck,
            _ => VehicleClass::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Truck => "truck",
            VehicleClass::Unknown => "unknown",
        }
    }
}

/// Vehicles entering the scene during one minute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeBin {
    pub bin_start_sec: f64,
    pub bin_end_sec: f64,
    pub vehicles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionFlow {
    pub vehicle_count: usize,
    pub hourly_flow_veh_per_h: f64,
    pub class_counts: BTreeMap<VehicleClass, usize>,
    pub class_shares: BTreeMap<VehicleClass, f64>,
    pub timeseries_1min: Vec<TimeBin>,
    /// Mean signed `xVelocity` in m/s over the direction's track rows; 0.0
    /// when none matched. Direction 1 drives towards negative x.
    pub avg_speed_m_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub recording_id: String,
    pub duration_sec: f64,
    pub directions: BTreeMap<u8, DirectionFlow>,
    pub hourly_flow_total: f64,
}

/// One vehicle from `tracksMeta.csv`.
#[derive(Debug, Clone, Copy)]
struct Vehicle {
    id: i64,
    class: VehicleClass,
    initial_frame: Option<f64>,
}

fn parse_int(row: &Row, key: &str) -> Option<i64> {
    row.get(key)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v as i64)
}

/// Vehicles grouped by driving direction. Rows without a usable direction or
/// id are skipped. Only the first row per id is kept.
fn vehicles_by_direction(tracks_meta: &[Row]) -> BTreeMap<u8, Vec<Vehicle>> {
    let mut seen = BTreeSet::new();
    let mut grouped: BTreeMap<u8, Vec<Vehicle>> = BTreeMap::new();
    for row in tracks_meta {
        let (Some(direction), Some(id)) = (parse_int(row, "drivingDirection"), parse_int(row, "id"))
        else {
            continue;
        };
        let Ok(direction) = u8::try_from(direction) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        grouped.entry(direction).or_default().push(Vehicle {
            id,
            class: VehicleClass::from_label(row.get("class").unwrap_or("")),
            initial_frame: row.get("initialFrame").and_then(|v| v.parse::<f64>().ok()),
        });
    }
    grouped
}

pub fn hourly_flow(vehicle_count: usize, duration_sec: f64) -> f64 {
    if duration_sec <= 0.0 {
        return 0.0;
    }
    vehicle_count as f64 / duration_sec * 3600.0
}

/// Arrivals per minute, keyed by the minute a vehicle first appears.
/// Only minutes with at least one arrival are listed.
fn minute_series(vehicles: &[Vehicle], frame_rate: f64, duration_sec: f64) -> Vec<TimeBin> {
    if frame_rate <= 0.0 {
        return Vec::new();
    }
    let mut bins: BTreeMap<i64, usize> = BTreeMap::new();
    for frame in vehicles.iter().filter_map(|v| v.initial_frame) {
        let bin = (frame / frame_rate / BIN_SECONDS).floor() as i64;
        *bins.entry(bin).or_default() += 1;
    }
    bins.into_iter()
        .map(|(bin, vehicles)| {
            let start = bin as f64 * BIN_SECONDS;
            TimeBin {
                bin_start_sec: start,
                bin_end_sec: (start + BIN_SECONDS).min(duration_sec),
                vehicles,
            }
        })
        .collect()
}

fn mean_speed(tracks: &[Row], ids: &BTreeSet<i64>) -> f64 {
    let speeds: Vec<f64> = tracks
        .iter()
        .filter(|row| parse_int(row, "id").is_some_and(|id| ids.contains(&id)))
        .map(|row| {
            row.get("xVelocity")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        })
        .collect();
    if speeds.is_empty() {
        return 0.0;
    }
    speeds.iter().sum::<f64>() / speeds.len() as f64
}

/// Summarize flow per direction for a loaded recording.
pub fn summarize_flow(recording: &RecordingData) -> FlowSummary {
    let meta = &recording.meta;
    let duration = meta.duration;

    let mut directions = BTreeMap::new();
    for (direction, vehicles) in vehicles_by_direction(&recording.tracks_meta) {
        let vehicle_count = vehicles.len();

        let mut class_counts: BTreeMap<VehicleClass, usize> = BTreeMap::new();
        for vehicle in &vehicles {
            *class_counts.entry(vehicle.class).or_default() += 1;
        }
        let class_shares = class_counts
            .iter()
            .map(|(&class, &count)| (class, count as f64 / vehicle_count as f64))
            .collect();

        let ids: BTreeSet<i64> = vehicles.iter().map(|v| v.id).collect();
        let flow = DirectionFlow {
            vehicle_count,
            hourly_flow_veh_per_h: hourly_flow(vehicle_count, duration),
            class_counts,
            class_shares,
            timeseries_1min: minute_series(&vehicles, meta.frame_rate, duration),
            avg_speed_m_s: mean_speed(&recording.tracks, &ids),
        };
        tracing::debug!(
            "recording {}: direction {direction} has {vehicle_count} vehicles, {:.1} veh/h",
            meta.recording_id,
            flow.hourly_flow_veh_per_h
        );
        directions.insert(direction, flow);
    }

    let hourly_flow_total = directions.values().map(|d| d.hourly_flow_veh_per_h).sum();

    FlowSummary {
        recording_id: meta.recording_id.clone(),
        duration_sec: duration,
        directions,
        hourly_flow_total,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
