//! Sequential historical fetch for a list of sensors.
//!
//! One sensor at a time, one request per span the API allows, with a fixed
//! courtesy delay between consecutive requests. Transient failures are
//! retried with a fixed backoff; a sensor that still fails is skipped and
//! recorded in the report. Only an auth rejection stops the loop.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ingest::{chunk_range, AveragingInterval, HistoryRequest, SensorApi};
use crate::logging::{self, DataSource};
use crate::model::{PurpleAirError, Reading, Sensor};

/// Knobs of the fetch loop, taken from `Config`.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub average: AveragingInterval,
    pub field: String,
    /// Sleep between consecutive requests.
    pub rate_limit_delay: Duration,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

/// What happened to one sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorOutcome {
    Fetched { readings: usize },
    /// The API answered but had no buckets for the range.
    NoData,
    Skipped { error: PurpleAirError, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorFetch {
    pub sensor_index: u64,
    pub name: String,
    pub outcome: SensorOutcome,
}

/// Series per sensor plus one outcome per requested sensor, in request order.
#[derive(Debug, Clone, Default)]
pub struct HistoryReport {
    /// Readings ascending by timestamp, unique per timestamp. Only sensors
    /// with at least one reading have an entry.
    pub series: BTreeMap<u64, Vec<Reading>>,
    pub outcomes: Vec<SensorFetch>,
}

impl HistoryReport {
    pub fn fetched_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, SensorOutcome::Fetched { .. }))
            .count()
    }

    pub fn no_data_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == SensorOutcome::NoData)
            .count()
    }

    pub fn skipped(&self) -> Vec<&SensorFetch> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, SensorOutcome::Skipped { .. }))
            .collect()
    }

    pub fn total_readings(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }
}

/// Fetches history for every sensor.
///
/// Returns `Err` only for an auth rejection, which would fail identically
/// for every remaining sensor.
pub fn fetch_history<A: SensorApi + ?Sized>(
    api: &A,
    sensors: &[Sensor],
    settings: &FetchSettings,
) -> Result<HistoryReport, PurpleAirError> {
    let mut report = HistoryReport::default();
    let chunks = chunk_range(settings.start, settings.end, settings.average.max_request_span());
    let mut requests_sent = 0usize;

    logging::info(
        DataSource::PurpleAir,
        None,
        &format!(
            "Fetching history for {} sensors ({} to {}, {}-minute average, {} request(s) each)",
            sensors.len(),
            settings.start.format("%Y-%m-%d %H:%M"),
            settings.end.format("%Y-%m-%d %H:%M"),
            settings.average.minutes(),
            chunks.len()
        ),
    );

    for (i, sensor) in sensors.iter().enumerate() {
        let site = sensor.sensor_index.to_string();
        logging::info(
            DataSource::PurpleAir,
            Some(&site),
            &format!("[{}/{}] {}", i + 1, sensors.len(), sensor.display_name()),
        );

        let mut by_time: BTreeMap<DateTime<Utc>, Reading> = BTreeMap::new();
        let mut failure = None;

        for &(start, end) in &chunks {
            if requests_sent > 0 && !settings.rate_limit_delay.is_zero() {
                std::thread::sleep(settings.rate_limit_delay);
            }
            requests_sent += 1;

            let request = HistoryRequest {
                start,
                end,
                average: settings.average,
                field: settings.field.clone(),
            };
            let fetch = || api.sensor_history(sensor.sensor_index, &request);
            match with_retry(settings, &site, fetch) {
                Ok(readings) => {
                    for reading in readings {
                        by_time.entry(reading.timestamp).or_insert(reading);
                    }
                }
                Err((error, _)) if error.is_auth() => return Err(error),
                Err((error, attempts)) => {
                    failure = Some((error, attempts));
                    break;
                }
            }
        }

        let outcome = match failure {
            Some((error, attempts)) => {
                logging::log_sensor_failure(&site, "history fetch", &error);
                SensorOutcome::Skipped { error, attempts }
            }
            None if by_time.is_empty() => {
                logging::info(DataSource::PurpleAir, Some(&site), "    no data available");
                SensorOutcome::NoData
            }
            None => {
                let readings: Vec<Reading> = by_time.into_values().collect();
                logging::info(
                    DataSource::PurpleAir,
                    Some(&site),
                    &format!("    got {} data points", readings.len()),
                );
                let count = readings.len();
                report.series.insert(sensor.sensor_index, readings);
                SensorOutcome::Fetched { readings: count }
            }
        };

        report.outcomes.push(SensorFetch {
            sensor_index: sensor.sensor_index,
            name: sensor.display_name(),
            outcome,
        });
    }

    logging::log_fetch_summary(
        DataSource::PurpleAir,
        sensors.len(),
        report.fetched_count() + report.no_data_count(),
        report.skipped().len(),
    );

    Ok(report)
}

/// Runs `call` until it succeeds, fails permanently, or runs out of retries.
/// On failure returns the last error and the number of attempts made.
fn with_retry<T, F>(
    settings: &FetchSettings,
    site: &str,
    mut call: F,
) -> Result<T, (PurpleAirError, u32)>
where
    F: FnMut() -> Result<T, PurpleAirError>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match call() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempts <= settings.max_retries => {
                logging::warn(
                    DataSource::PurpleAir,
                    Some(site),
                    &format!(
                        "attempt {}/{} failed: {}; retrying in {:?}",
                        attempts,
                        settings.max_retries + 1,
                        error,
                        settings.retry_backoff
                    ),
                );
                if !settings.retry_backoff.is_zero() {
                    std::thread::sleep(settings.retry_backoff);
                }
            }
            Err(error) => return Err((error, attempts)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
