//! Core data types for the PurpleAir AQI animation pipeline.
//!
//! This module defines the shared domain model imported by all other modules:
//! sensors, readings, derived AQI values, frames, and the error types that
//! fetch and conversion can produce. It contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

/// PurpleAir field for PM2.5 with the ATM correction (outdoor sensors).
pub const FIELD_PM25_ATM: &str = "pm2.5_atm";

/// PurpleAir field for the current PM2.5 value in the sensor directory.
pub const FIELD_PM25: &str = "pm2.5";

// ---------------------------------------------------------------------------
// Sensor and reading types
// ---------------------------------------------------------------------------

/// An outdoor PurpleAir sensor returned by the directory endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_index: u64,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Current PM2.5 (µg/m³) as reported by the directory, if any.
    pub pm25_current: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Sensor {
    /// Name for progress output; falls back to the numeric index.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("sensor {}", self.sensor_index),
        }
    }
}

/// One time-bucketed PM2.5 measurement for a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_index: u64,
    pub timestamp: DateTime<Utc>,
    /// Raw concentration in µg/m³. NaN when the API returned a
    /// non-numeric value.
    pub pm25: f64,
}

// ---------------------------------------------------------------------------
// AQI types
// ---------------------------------------------------------------------------

/// EPA AQI categories, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const ALL: [AqiCategory; 6] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthyForSensitiveGroups,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// AQI span shown in legends, e.g. "51-100".
    pub fn range_label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "0-50",
            AqiCategory::Moderate => "51-100",
            AqiCategory::UnhealthyForSensitiveGroups => "101-150",
            AqiCategory::Unhealthy => "151-200",
            AqiCategory::VeryUnhealthy => "201-300",
            AqiCategory::Hazardous => "301+",
        }
    }

    /// Official EPA color as RGB.
    pub fn color(&self) -> [u8; 3] {
        match self {
            AqiCategory::Good => [0x00, 0xE4, 0x00],
            AqiCategory::Moderate => [0xFF, 0xFF, 0x00],
            AqiCategory::UnhealthyForSensitiveGroups => [0xFF, 0x7E, 0x00],
            AqiCategory::Unhealthy => [0xFF, 0x00, 0x00],
            AqiCategory::VeryUnhealthy => [0x8F, 0x3F, 0x97],
            AqiCategory::Hazardous => [0x7E, 0x00, 0x23],
        }
    }
}

impl std::fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// AQI derived from a single concentration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AqiValue {
    pub aqi: u16,
    pub category: AqiCategory,
    /// The concentration this value was computed from.
    pub concentration: f64,
    /// Set when the concentration exceeded the top breakpoint and was clamped.
    pub above_scale: bool,
}

// ---------------------------------------------------------------------------
// Frame types
// ---------------------------------------------------------------------------

/// One sensor plotted on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePoint {
    pub sensor: Sensor,
    pub aqi: AqiValue,
}

/// Summary statistics over the AQI values of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub count: usize,
    pub mean: f64,
    pub min: u16,
    pub max: u16,
}

/// Everything needed to draw the map for one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    /// Ordered by sensor index.
    pub points: Vec<FramePoint>,
    pub stats: FrameStats,
}

// ---------------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------------

/// Geographic rectangle given by its north-west and south-east corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub nw_lat: f64,
    pub nw_lng: f64,
    pub se_lat: f64,
    pub se_lng: f64,
}

impl BoundingBox {
    /// Builds a box, rejecting corners that do not describe a NW/SE pair.
    pub fn new(
        nw_lat: f64,
        nw_lng: f64,
        se_lat: f64,
        se_lng: f64,
    ) -> Result<Self, BoundingBoxError> {
        let bbox = BoundingBox { nw_lat, nw_lng, se_lat, se_lng };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), BoundingBoxError> {
        let coords = [self.nw_lat, self.nw_lng, self.se_lat, self.se_lng];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(BoundingBoxError::NotFinite);
        }
        for lat in [self.nw_lat, self.se_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(BoundingBoxError::LatitudeOutOfRange(lat));
            }
        }
        for lng in [self.nw_lng, self.se_lng] {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(BoundingBoxError::LongitudeOutOfRange(lng));
            }
        }
        if self.nw_lat <= self.se_lat {
            return Err(BoundingBoxError::LatitudeOrder {
                nw_lat: self.nw_lat,
                se_lat: self.se_lat,
            });
        }
        if self.nw_lng >= self.se_lng {
            return Err(BoundingBoxError::LongitudeOrder {
                nw_lng: self.nw_lng,
                se_lng: self.se_lng,
            });
        }
        Ok(())
    }

    /// Parses `"nwlat,nwlng,selat,selng"`.
    pub fn parse(s: &str) -> Result<Self, BoundingBoxError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BoundingBoxError::Format(s.to_string()));
        }
        let mut coords = [0.0f64; 4];
        for (slot, part) in coords.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| BoundingBoxError::Format(s.to_string()))?;
        }
        BoundingBox::new(coords[0], coords[1], coords[2], coords[3])
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat <= self.nw_lat && lat >= self.se_lat && lng >= self.nw_lng && lng <= self.se_lng
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NW({}, {}) to SE({}, {})",
            self.nw_lat, self.nw_lng, self.se_lat, self.se_lng
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Rejections of a bounding box, raised before any network call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundingBoxError {
    #[error("bounding box must be 'nwlat,nwlng,selat,selng', got '{0}'")]
    Format(String),
    #[error("bounding box coordinates must be finite numbers")]
    NotFinite,
    #[error("latitude {0} is outside -90..=90")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside -180..=180")]
    LongitudeOutOfRange(f64),
    #[error("north-west latitude ({nw_lat}) must be greater than south-east latitude ({se_lat})")]
    LatitudeOrder { nw_lat: f64, se_lat: f64 },
    #[error("north-west longitude ({nw_lng}) must be less than south-east longitude ({se_lng})")]
    LongitudeOrder { nw_lng: f64, se_lng: f64 },
}

/// Errors that can arise when talking to the PurpleAir API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PurpleAirError {
    /// The API key was missing, invalid or lacks permission.
    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },
    /// Explicit 429 from the API.
    #[error("rate limited by PurpleAir API (HTTP 429)")]
    RateLimited,
    /// Any other non-2xx response.
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// The response body was not the expected JSON shape.
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The request never produced a response (connect failure, timeout).
    #[error("request failed: {message}")]
    Transport { message: String, timeout: bool },
}

impl PurpleAirError {
    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PurpleAirError::RateLimited | PurpleAirError::Transport { .. } => true,
            PurpleAirError::HttpError(status) => *status >= 500,
            PurpleAirError::Auth { .. } | PurpleAirError::ParseError(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, PurpleAirError::Auth { .. })
    }
}

/// A concentration the AQI formula cannot be applied to.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidReading {
    #[error("negative PM2.5 concentration: {0}")]
    Negative(f64),
    #[error("non-numeric PM2.5 concentration")]
    NotANumber,
}
