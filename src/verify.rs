//! API key and region verification.
//!
//! Backs `--check-key`: confirms the key is accepted, that the configured
//! bounding box actually contains sensors, and that one of them returns
//! history. Spends a handful of API points, so it is opt-in.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ingest::purpleair::PurpleAirClient;
use crate::ingest::{AveragingInterval, HistoryRequest, SensorApi};
use crate::model::{BoundingBox, FIELD_PM25_ATM};

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyVerification {
    pub status: VerificationStatus,
    pub api_key_type: Option<String>,
    pub api_version: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionVerification {
    pub status: VerificationStatus,
    pub sensors_found: usize,
    pub sensors_reporting: usize,
    /// Sensor whose history was sampled, if any.
    pub sampled_sensor: Option<u64>,
    pub sample_data_count: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub key: KeyVerification,
    /// Absent when the key check failed.
    pub region: Option<RegionVerification>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.key.status == VerificationStatus::Success
            && self.region.as_ref().is_some_and(|r| r.status != VerificationStatus::Failed)
    }
}

// ============================================================================
// Checks
// ============================================================================

pub fn verify_api_key(client: &PurpleAirClient) -> KeyVerification {
    match client.check_key() {
        Ok(keys) => {
            // A write key works for reads too, but warrants a heads-up
            let status = match keys.api_key_type.as_deref() {
                Some("READ") => VerificationStatus::Success,
                _ => VerificationStatus::PartialSuccess,
            };
            KeyVerification {
                status,
                api_key_type: keys.api_key_type,
                api_version: keys.api_version,
                error_message: None,
            }
        }
        Err(e) => KeyVerification {
            status: VerificationStatus::Failed,
            api_key_type: None,
            api_version: None,
            error_message: Some(e.to_string()),
        },
    }
}

/// Lists sensors in `bbox` and samples the last day of history of the first
/// one that reports a current value.
pub fn verify_region<A: SensorApi + ?Sized>(
    api: &A,
    bbox: &BoundingBox,
    now: DateTime<Utc>,
) -> RegionVerification {
    let mut result = RegionVerification {
        status: VerificationStatus::Failed,
        sensors_found: 0,
        sensors_reporting: 0,
        sampled_sensor: None,
        sample_data_count: 0,
        error_message: None,
    };

    let sensors = match api.sensors_in_box(bbox) {
        Ok(sensors) => sensors,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };
    result.sensors_found = sensors.len();
    result.sensors_reporting = sensors.iter().filter(|s| s.pm25_current.is_some()).count();

    let sample = sensors
        .iter()
        .find(|s| s.pm25_current.is_some())
        .or_else(|| sensors.first());
    let Some(sample) = sample else {
        result.error_message = Some(format!("no sensors in {}", bbox));
        return result;
    };

    result.sampled_sensor = Some(sample.sensor_index);
    let request = HistoryRequest {
        start: now - Duration::hours(24),
        end: now,
        average: AveragingInterval::Hourly,
        field: FIELD_PM25_ATM.to_string(),
    };
    match api.sensor_history(sample.sensor_index, &request) {
        Ok(readings) if !readings.is_empty() => {
            result.sample_data_count = readings.len();
            result.status = VerificationStatus::Success;
        }
        Ok(_) => {
            result.status = VerificationStatus::PartialSuccess;
            result.error_message =
                Some("sampled sensor returned no history for the last 24 hours".to_string());
        }
        Err(e) => {
            result.status = VerificationStatus::PartialSuccess;
            result.error_message = Some(format!("history sample failed: {}", e));
        }
    }
    result
}

/// Runs both checks, printing progress the way the main run does.
pub fn run_verification(
    client: &PurpleAirClient,
    bbox: &BoundingBox,
    region_title: &str,
) -> VerificationReport {
    let now = Utc::now();

    print!("  API key ... ");
    let key = verify_api_key(client);
    match key.status {
        VerificationStatus::Success => println!(
            "✓ OK ({} key, API {})",
            key.api_key_type.as_deref().unwrap_or("?"),
            key.api_version.as_deref().unwrap_or("?")
        ),
        VerificationStatus::PartialSuccess => println!(
            "⚠ Accepted, but key type is {}; a READ key is expected",
            key.api_key_type.as_deref().unwrap_or("unknown")
        ),
        VerificationStatus::Failed => {
            println!("✗ FAILED: {}", key.error_message.as_deref().unwrap_or("Unknown"));
            return VerificationReport { timestamp: now.to_rfc3339(), key, region: None };
        }
    }

    print!("  {} {} ... ", region_title, bbox);
    let region = verify_region(client, bbox, now);
    match region.status {
        VerificationStatus::Success => println!(
            "✓ OK ({} sensors, {} reporting, {} readings from sensor {})",
            region.sensors_found,
            region.sensors_reporting,
            region.sample_data_count,
            region.sampled_sensor.unwrap_or_default()
        ),
        VerificationStatus::PartialSuccess => println!(
            "⚠ {} sensors found, but {}",
            region.sensors_found,
            region.error_message.as_deref().unwrap_or("no sample data")
        ),
        VerificationStatus::Failed => {
            println!("✗ FAILED: {}", region.error_message.as_deref().unwrap_or("Unknown"))
        }
    }

    VerificationReport { timestamp: now.to_rfc3339(), key, region: Some(region) }
}
