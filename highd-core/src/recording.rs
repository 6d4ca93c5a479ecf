//! highD recording loader.
//!
//! A recording directory contains three CSV files:
//! - `recordingMeta.csv`: one row of recording metadata (frame rate,
//!   duration, speed limit, lane markings, timestamp)
//! - `tracksMeta.csv`: one row per vehicle (id, class, driving direction)
//! - `tracks.csv`: one row per vehicle per frame (position, velocity, lane)
//!
//! Track rows are kept as string-keyed `Row`s; the analytics modules pull
//! the columns they need and tolerate missing or malformed values.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::table::{read_csv_file, Row};
use crate::types::{HsmError, Result};

pub const META_FILE: &str = "recordingMeta.csv";
pub const TRACKS_META_FILE: &str = "tracksMeta.csv";
pub const TRACKS_FILE: &str = "tracks.csv";

/// Frame rate assumed when the metadata omits it.
const DEFAULT_FRAME_RATE: f64 = 25.0;

/// Datetime layouts accepted for the recording timestamp.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Recording-level metadata from `recordingMeta.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingMeta {
    pub recording_id: String,
    pub frame_rate: f64,
    /// Observation length in seconds.
    pub duration: f64,
    pub num_vehicles: u32,
    pub num_cars: u32,
    pub num_trucks: u32,
    pub speed_limit_m_s: f64,
    pub upper_lane_markings: Vec<f64>,
    pub lower_lane_markings: Vec<f64>,
    pub timestamp: Option<NaiveDateTime>,
}

impl RecordingMeta {
    pub fn duration_hours(&self) -> f64 {
        self.duration / 3600.0
    }

    pub fn speed_limit_kmh(&self) -> f64 {
        self.speed_limit_m_s * 3.6
    }
}

/// A loaded recording.
#[derive(Debug, Clone)]
pub struct RecordingData {
    pub path: PathBuf,
    pub meta: RecordingMeta,
    pub tracks_meta: Vec<Row>,
    pub tracks: Vec<Row>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a recording directory.
pub fn load_recording(path: &Path) -> Result<RecordingData> {
    let meta_path = path.join(META_FILE);
    let tracks_meta_path = path.join(TRACKS_META_FILE);
    let tracks_path = path.join(TRACKS_FILE);
    for required in [&meta_path, &tracks_meta_path, &tracks_path] {
        if !required.exists() {
            return Err(HsmError::MissingFile(required.clone()));
        }
    }

    let meta_rows = read_csv_file(&meta_path)?;
    let row = meta_rows.first().ok_or_else(|| {
        HsmError::Recording(format!("empty metadata in {}", meta_path.display()))
    })?;
    let fallback_id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let meta = parse_meta(row, &fallback_id)?;

    let tracks_meta = read_csv_file(&tracks_meta_path)?;
    let tracks = read_csv_file(&tracks_path)?;

    let first_meta = tracks_meta.first().ok_or_else(|| {
        HsmError::Recording(format!("{TRACKS_META_FILE} empty in {}", path.display()))
    })?;
    let first_track = tracks.first().ok_or_else(|| {
        HsmError::Recording(format!("{TRACKS_FILE} empty in {}", path.display()))
    })?;

    let missing: Vec<&str> = ["id", "drivingDirection"]
        .into_iter()
        .filter(|col| !first_meta.contains_key(col))
        .collect();
    if !missing.is_empty() {
        return Err(HsmError::Recording(format!(
            "{TRACKS_META_FILE} missing columns: {}",
            missing.join(", ")
        )));
    }
    if !first_track.contains_key("frame") {
        return Err(HsmError::Recording(format!(
            "{TRACKS_FILE} must include a 'frame' column"
        )));
    }

    tracing::debug!(
        "loaded recording {}: {} vehicles, {} track rows",
        meta.recording_id,
        tracks_meta.len(),
        tracks.len()
    );

    Ok(RecordingData {
        path: path.to_path_buf(),
        meta,
        tracks_meta,
        tracks,
    })
}

/// Parse the metadata row. Alternate column spellings are accepted.
fn parse_meta(row: &Row, fallback_id: &str) -> Result<RecordingMeta> {
    let number = |keys: &[&str], default: f64| -> Result<f64> {
        match keys.iter().find(|k| row.get(k).is_some()) {
            Some(key) => Ok(row.parse_f64(key, META_FILE)?.unwrap_or(default)),
            None => Ok(default),
        }
    };
    let count = |keys: &[&str]| -> Result<u32> { Ok(number(keys, 0.0)?.max(0.0) as u32) };

    Ok(RecordingMeta {
        recording_id: row.get_any(&["id", "recordingId"]).unwrap_or(fallback_id).to_string(),
        frame_rate: number(&["frameRate", "frame_rate"], DEFAULT_FRAME_RATE)?,
        duration: number(&["duration", "durationSec"], 0.0)?,
        num_vehicles: count(&["numVehicles", "numvehicles"])?,
        num_cars: count(&["numCars", "numcars"])?,
        num_trucks: count(&["numTrucks", "numtrucks"])?,
        speed_limit_m_s: number(&["speedLimit", "speedlimit"], 0.0)?,
        upper_lane_markings: parse_lane_markings(row.get("upperLaneMarkings").unwrap_or(""))?,
        lower_lane_markings: parse_lane_markings(row.get("lowerLaneMarkings").unwrap_or(""))?,
        timestamp: parse_timestamp(row),
    })
}

/// Parse lane marking y-positions: `8.5;12.6;16.4`, comma-separated, or a
/// JSON array.
pub fn parse_lane_markings(value: &str) -> Result<Vec<f64>> {
    let value = value.trim();
    if value.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Vec<f64>>(value) {
            return Ok(parsed);
        }
    }

    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .replace(';', ",")
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<f64>().map_err(|_| HsmError::Parse {
                context: META_FILE.to_string(),
                field: "laneMarkings".to_string(),
                value: p.to_string(),
            })
        })
        .collect()
}

/// First parsable timestamp among `timeStamp`, `timestamp`, `date`.
fn parse_timestamp(row: &Row) -> Option<NaiveDateTime> {
    ["timeStamp", "timestamp", "date"]
        .iter()
        .filter_map(|key| row.get(key))
        .find_map(parse_datetime)
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Recording directories under `root` (those containing `recordingMeta.csv`),
/// sorted by name.
pub fn iter_recordings(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    Ok(dirs
        .into_iter()
        .filter(|dir| {
            let has_meta = dir.join(META_FILE).exists();
            if !has_meta {
                tracing::debug!("skipping {}: missing {META_FILE}", dir.display());
            }
            has_meta
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Segment length
// ---------------------------------------------------------------------------

/// Linear-interpolated percentile (`perc` in 0-100) of unsorted values.
pub fn percentile(values: &[f64], perc: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let k = (sorted.len() - 1) as f64 * perc / 100.0;
    let f = k.floor() as usize;
    let c = (f + 1).min(sorted.len() - 1);
    if f == c {
        return sorted[f];
    }
    sorted[f] * (c as f64 - k) + sorted[c] * (k - f as f64)
}

/// Observed segment length in meters: the 5th-95th percentile span of track
/// x positions, which ignores vehicles partially in frame at the edges.
pub fn robust_segment_length(tracks: &[Row]) -> f64 {
    let xs: Vec<f64> = tracks
        .iter()
        .filter_map(|row| row.get("x").and_then(|v| v.parse::<f64>().ok()))
        .filter(|x| x.is_finite())
        .collect();
    if xs.is_empty() {
        tracing::warn!("tracks missing usable x coordinate; cannot estimate segment length");
        return 0.0;
    }
    (percentile(&xs, 95.0) - percentile(&xs, 5.0)).max(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn sample_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/highd_sample/01")
    }

    #[test]
    fn test_load_sample_recording() {
        let recording = load_recording(&sample_dir()).unwrap();
        let meta = &recording.meta;
        assert_eq!(meta.recording_id, "1");
        assert_eq!(meta.frame_rate, 25.0);
        assert_eq!(meta.duration, 300.0);
        assert_eq!(meta.num_vehicles, 10);
        assert_eq!(meta.upper_lane_markings.len(), 3);
        assert_eq!(meta.lower_lane_markings.len(), 3);
        assert!((meta.speed_limit_kmh() - 120.0).abs() < 0.1);
        assert!((meta.duration_hours() - 300.0 / 3600.0).abs() < 1e-12);

        let ts = meta.timestamp.unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day(), ts.hour()), (2017, 10, 17, 20));

        assert_eq!(recording.tracks_meta.len(), 10);
        assert_eq!(recording.tracks.len(), 50);
    }

    #[test]
    fn test_missing_directory_files() {
        let err = load_recording(Path::new("/nonexistent/recording")).unwrap_err();
        assert!(matches!(err, HsmError::MissingFile(_)));
    }

    #[test]
    fn test_parse_meta_defaults_and_aliases() {
        let row: Row = [("frame_rate", "30"), ("durationSec", "120.5"), ("numcars", "7")]
            .into_iter()
            .collect();
        let meta = parse_meta(&row, "dir42").unwrap();
        assert_eq!(meta.recording_id, "dir42");
        assert_eq!(meta.frame_rate, 30.0);
        assert_eq!(meta.duration, 120.5);
        assert_eq!(meta.num_cars, 7);
        assert_eq!(meta.speed_limit_m_s, 0.0);
        assert!(meta.upper_lane_markings.is_empty());
        assert!(meta.timestamp.is_none());
    }

    #[test]
    fn test_parse_meta_bad_number() {
        let row: Row = [("frameRate", "fast")].into_iter().collect();
        assert!(matches!(
            parse_meta(&row, "x"),
            Err(HsmError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_lane_markings() {
        assert_eq!(parse_lane_markings("8.5;12.5;16.5").unwrap(), vec![8.5, 12.5, 16.5]);
        assert_eq!(parse_lane_markings("[1.0, 2.0]").unwrap(), vec![1.0, 2.0]);
        assert_eq!(parse_lane_markings("1,2,").unwrap(), vec![1.0, 2.0]);
        assert!(parse_lane_markings("").unwrap().is_empty());
        assert!(parse_lane_markings("1;x").is_err());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let row: Row = [("timeStamp", "garbage"), ("date", "2018-03-05")]
            .into_iter()
            .collect();
        let ts = parse_timestamp(&row).unwrap();
        assert_eq!((ts.month(), ts.day(), ts.hour()), (3, 5, 0));

        assert!(parse_datetime("2017-10-17 08:15:00").is_some());
        assert!(parse_datetime("2017-10-17T08:15").is_some());
        assert!(parse_datetime("2017-10-17T08:15:00+02:00").is_some());
        assert!(parse_datetime("17/10/2017").is_none());
    }

    #[test]
    fn test_percentile() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_robust_segment_length() {
        let tracks: Vec<Row> = (0..=100)
            .map(|i| [("x", (i as f64 * 4.0).to_string())].into_iter().collect())
            .collect();
        assert!((robust_segment_length(&tracks) - 360.0).abs() < 1e-9);

        let no_x: Vec<Row> = vec![[("y", "1.0")].into_iter().collect()];
        assert_eq!(robust_segment_length(&no_x), 0.0);
    }

    #[test]
    fn test_iter_recordings() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/highd_sample");
        let dirs = iter_recordings(&root).unwrap();
        assert_eq!(dirs, vec![sample_dir()]);
    }
}
