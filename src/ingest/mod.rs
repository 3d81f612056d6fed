//! Data acquisition from the PurpleAir API.
//!
//! Submodules:
//! - `purpleair`: HTTP client, URL/query construction and payload parsing.
//! - `history`: the sequential, rate-limited per-sensor history fetch loop.

pub mod history;
pub mod purpleair;

use chrono::{DateTime, Duration, Utc};

use crate::model::{BoundingBox, PurpleAirError, Reading, Sensor};

/// Averaging period for historical readings, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AveragingInterval {
    RealTime,
    TenMinute,
    ThirtyMinute,
    Hourly,
}

impl AveragingInterval {
    pub fn from_minutes(minutes: u32) -> Option<AveragingInterval> {
        match minutes {
            0 => Some(AveragingInterval::RealTime),
            10 => Some(AveragingInterval::TenMinute),
            30 => Some(AveragingInterval::ThirtyMinute),
            60 => Some(AveragingInterval::Hourly),
            _ => None,
        }
    }

    /// Value of the `average` query parameter.
    pub fn minutes(&self) -> u32 {
        match self {
            AveragingInterval::RealTime => 0,
            AveragingInterval::TenMinute => 10,
            AveragingInterval::ThirtyMinute => 30,
            AveragingInterval::Hourly => 60,
        }
    }

    /// Longest span the API serves in one history request at this interval.
    pub fn max_request_span(&self) -> Duration {
        match self {
            AveragingInterval::RealTime => Duration::days(2),
            AveragingInterval::TenMinute => Duration::days(3),
            AveragingInterval::ThirtyMinute => Duration::days(7),
            AveragingInterval::Hourly => Duration::days(14),
        }
    }
}

/// Parameters of one history request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub average: AveragingInterval,
    pub field: String,
}

/// The two PurpleAir operations the pipeline depends on.
///
/// `purpleair::PurpleAirClient` is the real implementation; tests drive the
/// pipeline with in-memory fakes.
pub trait SensorApi {
    /// Outdoor sensors inside the box.
    fn sensors_in_box(&self, bbox: &BoundingBox) -> Result<Vec<Sensor>, PurpleAirError>;

    /// Readings for one sensor over one request span. Order is not
    /// guaranteed.
    fn sensor_history(
        &self,
        sensor_index: u64,
        request: &HistoryRequest,
    ) -> Result<Vec<Reading>, PurpleAirError>;
}

/// Splits `[start, end]` into consecutive spans no longer than `max_span`.
pub fn chunk_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_span: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut chunks = Vec::new();
    if end <= start || max_span <= Duration::zero() {
        return chunks;
    }
    let mut cursor = start;
    while cursor < end {
        let next = std::cmp::min(cursor + max_span, end);
        chunks.push((cursor, next));
        cursor = next;
    }
    chunks
}
