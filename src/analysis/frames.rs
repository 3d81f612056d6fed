//! Frame assembly.
//!
//! Turns per-sensor series into one `Frame` per distinct timestamp. Each
//! reading is converted independently, so a bad value drops that reading
//! only. Frames come out in ascending time order, which is the order the
//! renderer numbers them in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::aqi;
use crate::logging::{self, DataSource};
use crate::model::{Frame, FramePoint, FrameStats, InvalidReading, Reading, Sensor};

/// A reading rejected by the AQI converter.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedReading {
    pub sensor_index: u64,
    pub timestamp: DateTime<Utc>,
    pub reason: InvalidReading,
}

#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    pub frames: Vec<Frame>,
    pub dropped: Vec<DroppedReading>,
}

/// Builds chronologically ordered frames.
///
/// Readings for sensors missing from `sensors` are ignored. With
/// `frame_step`, the first timestamp is kept and each following frame is at
/// least `frame_step` after the previously kept one.
pub fn build_frames(
    sensors: &[Sensor],
    series: &BTreeMap<u64, Vec<Reading>>,
    frame_step: Option<Duration>,
) -> FrameSet {
    let by_index: HashMap<u64, &Sensor> = sensors.iter().map(|s| (s.sensor_index, s)).collect();

    let mut grouped: BTreeMap<DateTime<Utc>, Vec<FramePoint>> = BTreeMap::new();
    let mut dropped = Vec::new();

    // BTreeMap iteration keeps points inside a frame ordered by sensor index.
    for (index, readings) in series {
        let sensor = match by_index.get(index) {
            Some(s) => *s,
            None => continue,
        };
        for reading in readings {
            match aqi::convert(reading.pm25) {
                Ok(value) => grouped.entry(reading.timestamp).or_default().push(FramePoint {
                    sensor: sensor.clone(),
                    aqi: value,
                }),
                Err(reason) => {
                    logging::debug(
                        DataSource::Aqi,
                        Some(&index.to_string()),
                        &format!("dropping reading at {}: {}", reading.timestamp, reason),
                    );
                    dropped.push(DroppedReading {
                        sensor_index: *index,
                        timestamp: reading.timestamp,
                        reason,
                    });
                }
            }
        }
    }

    let keep: BTreeSet<DateTime<Utc>> =
        select_timestamps(grouped.keys().copied(), frame_step).into_iter().collect();
    let frames = grouped
        .into_iter()
        .filter(|(timestamp, _)| keep.contains(timestamp))
        .filter_map(|(timestamp, points)| {
            frame_stats(&points).map(|stats| Frame { timestamp, points, stats })
        })
        .collect();

    FrameSet { frames, dropped }
}

/// Timestamps to keep given ascending `timestamps` and an optional step.
pub fn select_timestamps(
    timestamps: impl Iterator<Item = DateTime<Utc>>,
    step: Option<Duration>,
) -> Vec<DateTime<Utc>> {
    let step = step.filter(|s| *s > Duration::zero());
    let mut kept: Vec<DateTime<Utc>> = Vec::new();
    for t in timestamps {
        match (step, kept.last()) {
            (Some(step), Some(last)) if t - *last < step => {}
            _ => kept.push(t),
        }
    }
    kept
}

/// Count/mean/min/max over a frame's AQI values; `None` for no points.
pub fn frame_stats(points: &[FramePoint]) -> Option<FrameStats> {
    if points.is_empty() {
        return None;
    }
    let values: Vec<u16> = points.iter().map(|p| p.aqi.aqi).collect();
    let sum: f64 = values.iter().map(|v| f64::from(*v)).sum();
    Some(FrameStats {
        count: values.len(),
        mean: sum / values.len() as f64,
        min: values.iter().copied().min().unwrap_or(0),
        max: values.iter().copied().max().unwrap_or(0),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
