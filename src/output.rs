//! Flat output files.
//!
//! - `sensors_current.csv`: the sensor directory with each sensor's current
//!   PM2.5 and AQI. Also the sensor half of the `--use-cached` cache.
//! - `readings.csv`: every fetched reading, reloadable with `--use-cached`
//!   to re-render without spending API points.
//! - `data_summary.txt`: human-readable account of the run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aqi;
use crate::animate::EncodeOutcome;
use crate::ingest::history::SensorOutcome;
use crate::model::{Reading, Sensor};
use crate::pipeline::RunSummary;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// CSV rows
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SensorRow {
    sensor_index: u64,
    name: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(rename = "pm2.5")]
    pm25: Option<f64>,
    aqi: Option<u16>,
    category: Option<String>,
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReadingRow {
    sensor_index: u64,
    timestamp: DateTime<Utc>,
    #[serde(rename = "pm2.5")]
    pm25: f64,
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Writes the directory with current PM2.5 converted to AQI. Sensors whose
/// current value is missing or invalid get empty AQI columns.
pub fn write_sensors_csv(path: &Path, sensors: &[Sensor]) -> Result<(), CacheError> {
    let mut writer = csv::Writer::from_path(path)?;
    for sensor in sensors {
        let value = sensor.pm25_current.and_then(|pm| aqi::convert(pm).ok());
        writer.serialize(SensorRow {
            sensor_index: sensor.sensor_index,
            name: sensor.name.clone(),
            latitude: sensor.latitude,
            longitude: sensor.longitude,
            pm25: sensor.pm25_current,
            aqi: value.map(|v| v.aqi),
            category: value.map(|v| v.category.label().to_string()),
            last_seen: sensor.last_seen,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_sensors_csv(path: &Path) -> Result<Vec<Sensor>, CacheError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut sensors = Vec::new();
    for row in reader.deserialize() {
        let row: SensorRow = row?;
        sensors.push(Sensor {
            sensor_index: row.sensor_index,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            pm25_current: row.pm25,
            last_seen: row.last_seen,
        });
    }
    Ok(sensors)
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

pub fn write_readings_csv(
    path: &Path,
    series: &BTreeMap<u64, Vec<Reading>>,
) -> Result<(), CacheError> {
    let mut writer = csv::Writer::from_path(path)?;
    for reading in series.values().flatten() {
        writer.serialize(ReadingRow {
            sensor_index: reading.sensor_index,
            timestamp: reading.timestamp,
            pm25: reading.pm25,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads cached readings, restoring per-sensor ascending, unique order.
pub fn load_readings_csv(path: &Path) -> Result<BTreeMap<u64, Vec<Reading>>, CacheError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut by_sensor: BTreeMap<u64, BTreeMap<DateTime<Utc>, Reading>> = BTreeMap::new();
    for row in reader.deserialize() {
        let row: ReadingRow = row?;
        by_sensor
            .entry(row.sensor_index)
            .or_default()
            .entry(row.timestamp)
            .or_insert(Reading {
                sensor_index: row.sensor_index,
                timestamp: row.timestamp,
                pm25: row.pm25,
            });
    }
    Ok(by_sensor
        .into_iter()
        .map(|(index, readings)| (index, readings.into_values().collect()))
        .collect())
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PurpleAir AQI Animation Data Summary");
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Time period: {} to {}",
        summary.start.format("%Y-%m-%d %H:%M UTC"),
        summary.end.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "Averaging: {} minutes", summary.average_minutes);
    let _ = writeln!(out, "Region: {} {}", summary.region_title, summary.bbox);
    let source = if summary.from_cache { "cached CSV" } else { "PurpleAir API" };
    let _ = writeln!(out, "Data source: {}", source);
    let _ = writeln!(out, "Total sensors: {}", summary.outcomes.len());
    let _ = writeln!(out, "Sensors with data: {}", summary.sensors_with_data());
    let _ = writeln!(out, "Sensors without data: {}", summary.sensors_without_data());
    let _ = writeln!(out, "Sensors skipped: {}", summary.sensors_skipped());
    let _ = writeln!(out, "Readings dropped (invalid): {}", summary.dropped_readings);
    let _ = writeln!(
        out,
        "Frames: {} built, {} written, {} failed",
        summary.frames_built, summary.frames_written, summary.frames_failed
    );
    if let Some((when, aqi)) = summary.peak {
        let _ = writeln!(out, "Peak AQI: {} at {}", aqi, when.format("%Y-%m-%d %H:%M UTC"));
    }

    if !summary.animations.is_empty() {
        let _ = writeln!(out, "\nAnimations:");
        for (format, outcome) in &summary.animations {
            let line = match outcome {
                EncodeOutcome::Written { path, tool } => format!("{} ({})", path.display(), tool),
                EncodeOutcome::ToolMissing => "skipped (no encoder installed)".to_string(),
                EncodeOutcome::Failed { exit_code, stderr } => {
                    format!("failed ({})", EncodeOutcome::failure_text(*exit_code, stderr))
                }
            };
            let _ = writeln!(out, "  {}: {}", format.extension(), line);
        }
    }

    let _ = writeln!(out, "\nSensors:");
    for fetch in &summary.outcomes {
        let status = match &fetch.outcome {
            SensorOutcome::Fetched { readings } => format!("{} points", readings),
            SensorOutcome::NoData => "no data".to_string(),
            SensorOutcome::Skipped { error, attempts } => {
                format!("SKIPPED after {} attempt(s): {}", attempts, error)
            }
        };
        let _ = writeln!(out, "  {}: {} ({})", fetch.sensor_index, fetch.name, status);
    }
    out
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> std::io::Result<()> {
    fs::write(path, format_summary(summary))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
