//! PurpleAir API client.
//!
//! Retrieves the sensor directory for a bounding box and per-sensor PM2.5
//! history. Both endpoints answer with a column-oriented payload: a `fields`
//! array naming the columns and a `data` array of rows.
//!
//! API documentation: https://api.purpleair.com/
//! Keys: https://develop.purpleair.com/

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::{HistoryRequest, SensorApi};
use crate::model::{BoundingBox, PurpleAirError, Reading, Sensor, FIELD_PM25};

pub const PURPLEAIR_BASE_URL: &str = "https://api.purpleair.com";

/// Header carrying the read key on every request.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Columns requested from the sensor directory (`sensor_index` is implicit).
pub const SENSOR_FIELDS: &[&str] = &["name", "latitude", "longitude", FIELD_PM25, "last_seen"];

/// `location_type=0` restricts the directory to outdoor sensors.
const LOCATION_OUTDOOR: &str = "0";

// ============================================================================
// API Response Structures
// ============================================================================

/// `GET /v1/sensors` response.
#[derive(Debug, Deserialize)]
pub struct SensorsResponse {
    pub fields: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

/// `GET /v1/sensors/{index}/history` response.
#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub sensor_index: Option<u64>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

/// `GET /v1/keys` response.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysResponse {
    pub api_version: Option<String>,
    pub api_key_type: Option<String>,
    pub time_stamp: Option<i64>,
}

/// Error body the API sends with 4xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    description: Option<String>,
}

// ============================================================================
// Request construction
// ============================================================================

pub fn sensors_url(base_url: &str) -> String {
    format!("{}/v1/sensors", base_url.trim_end_matches('/'))
}

pub fn history_url(base_url: &str, sensor_index: u64) -> String {
    format!(
        "{}/v1/sensors/{}/history",
        base_url.trim_end_matches('/'),
        sensor_index
    )
}

pub fn keys_url(base_url: &str) -> String {
    format!("{}/v1/keys", base_url.trim_end_matches('/'))
}

pub fn sensors_query(bbox: &BoundingBox) -> Vec<(&'static str, String)> {
    vec![
        ("fields", SENSOR_FIELDS.join(",")),
        ("location_type", LOCATION_OUTDOOR.to_string()),
        ("nwlat", bbox.nw_lat.to_string()),
        ("nwlng", bbox.nw_lng.to_string()),
        ("selat", bbox.se_lat.to_string()),
        ("selng", bbox.se_lng.to_string()),
    ]
}

pub fn history_query(request: &HistoryRequest) -> Vec<(&'static str, String)> {
    vec![
        ("start_timestamp", request.start.timestamp().to_string()),
        ("end_timestamp", request.end.timestamp().to_string()),
        ("average", request.average.minutes().to_string()),
        ("fields", request.field.clone()),
    ]
}

// ============================================================================
// Response handling
// ============================================================================

/// Maps a non-success status to the error taxonomy. `body` is used only to
/// enrich the auth message.
pub fn classify_status(status: u16, body: &str) -> Result<(), PurpleAirError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => {
            let detail = serde_json::from_str::<ErrorBody>(body)
                .ok()
                .and_then(|b| b.description.or(b.error))
                .unwrap_or_else(|| "API key missing or invalid".to_string());
            Err(PurpleAirError::Auth { status, message: detail })
        }
        429 => Err(PurpleAirError::RateLimited),
        _ => Err(PurpleAirError::HttpError(status)),
    }
}

/// Parses the sensor directory payload.
///
/// Columns are located by name. Rows without a numeric index or
/// coordinates cannot be placed on a map and are dropped.
pub fn parse_sensors_response(body: &str) -> Result<Vec<Sensor>, PurpleAirError> {
    let response: SensorsResponse = serde_json::from_str(body)
        .map_err(|e| PurpleAirError::ParseError(format!("sensor directory: {}", e)))?;

    let column = |name: &str| response.fields.iter().position(|f| f == name);
    let index_col = column("sensor_index").ok_or_else(|| {
        PurpleAirError::ParseError("sensor directory has no sensor_index column".to_string())
    })?;
    let (lat_col, lng_col) = match (column("latitude"), column("longitude")) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            return Err(PurpleAirError::ParseError(
                "sensor directory has no latitude/longitude columns".to_string(),
            ));
        }
    };
    let name_col = column("name");
    let pm_col = column(FIELD_PM25);
    let seen_col = column("last_seen");

    let mut sensors = Vec::with_capacity(response.data.len());
    for row in &response.data {
        let sensor_index = match row.get(index_col).and_then(Value::as_u64) {
            Some(i) => i,
            None => continue,
        };
        let (latitude, longitude) = match (
            row.get(lat_col).and_then(number),
            row.get(lng_col).and_then(number),
        ) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => continue,
        };

        sensors.push(Sensor {
            sensor_index,
            name: name_col
                .and_then(|c| row.get(c))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
            latitude,
            longitude,
            pm25_current: pm_col.and_then(|c| row.get(c)).and_then(number),
            last_seen: seen_col
                .and_then(|c| row.get(c))
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        });
    }

    Ok(sensors)
}

/// Parses a history payload into readings of `field`.
///
/// `null` values are missing buckets and produce no reading. Non-numeric
/// values are kept as NaN so the AQI step can reject them individually.
pub fn parse_history_response(
    body: &str,
    sensor_index: u64,
    field: &str,
) -> Result<Vec<Reading>, PurpleAirError> {
    let response: HistoryResponse = serde_json::from_str(body)
        .map_err(|e| PurpleAirError::ParseError(format!("history for {}: {}", sensor_index, e)))?;

    if let Some(returned) = response.sensor_index {
        if returned != sensor_index {
            return Err(PurpleAirError::ParseError(format!(
                "asked for sensor {} but history is for {}",
                sensor_index, returned
            )));
        }
    }

    let time_col = response
        .fields
        .iter()
        .position(|f| f == "time_stamp")
        .ok_or_else(|| PurpleAirError::ParseError("history has no time_stamp column".to_string()))?;
    let value_col = response
        .fields
        .iter()
        .position(|f| f == field)
        .ok_or_else(|| PurpleAirError::ParseError(format!("history has no {} column", field)))?;

    let mut readings = Vec::with_capacity(response.data.len());
    for row in &response.data {
        let timestamp = match row
            .get(time_col)
            .and_then(Value::as_i64)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        {
            Some(t) => t,
            None => continue,
        };
        let pm25 = match row.get(value_col) {
            None | Some(Value::Null) => continue,
            Some(v) => number(v).unwrap_or(f64::NAN),
        };
        readings.push(Reading { sensor_index, timestamp, pm25 });
    }

    Ok(readings)
}

/// Numbers, and strings that parse as numbers.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Blocking client bound to one API key.
pub struct PurpleAirClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
}

impl PurpleAirClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, PurpleAirError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(PurpleAirClient {
            http,
            api_key: api_key.to_string(),
            base_url: PURPLEAIR_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks the key against `/v1/keys`.
    pub fn check_key(&self) -> Result<KeysResponse, PurpleAirError> {
        let body = self.get(&keys_url(&self.base_url), &[])?;
        serde_json::from_str(&body)
            .map_err(|e| PurpleAirError::ParseError(format!("keys response: {}", e)))
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, PurpleAirError> {
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().map_err(transport_error)?;
        classify_status(status, &body)?;
        Ok(body)
    }
}

impl SensorApi for PurpleAirClient {
    fn sensors_in_box(&self, bbox: &BoundingBox) -> Result<Vec<Sensor>, PurpleAirError> {
        let body = self.get(&sensors_url(&self.base_url), &sensors_query(bbox))?;
        parse_sensors_response(&body)
    }

    fn sensor_history(
        &self,
        sensor_index: u64,
        request: &HistoryRequest,
    ) -> Result<Vec<Reading>, PurpleAirError> {
        let body = self.get(
            &history_url(&self.base_url, sensor_index),
            &history_query(request),
        )?;
        parse_history_response(&body, sensor_index, &request.field)
    }
}

fn transport_error(err: reqwest::Error) -> PurpleAirError {
    PurpleAirError::Transport {
        message: err.to_string(),
        timeout: err.is_timeout(),
    }
}

// ============================================================================
// Tests
// ============================================================================
