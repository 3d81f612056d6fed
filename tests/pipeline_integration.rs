/// End-to-end pipeline tests against an in-memory PurpleAir API.
///
/// These tests verify:
/// 1. A sensor that fails every retry is skipped while the others render
/// 2. Frames land in the output directory in playback order
/// 3. Auth rejection, an empty region and unusable data are fatal
/// 4. A second run with --use-cached needs no API at all
/// 5. An inverted bounding box is rejected before any API call
///
/// No network or encoder is needed: the assembler is pointed at programs
/// that do not exist, which must degrade to "tool missing".

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};

use purpleair_aqi::animate::{AnimationFormat, Assembler, EncodeOutcome};
use purpleair_aqi::cli::CliArgs;
use purpleair_aqi::config::{Config, ConfigError, Environment, FileConfig};
use purpleair_aqi::ingest::history::SensorOutcome;
use purpleair_aqi::ingest::{HistoryRequest, SensorApi};
use purpleair_aqi::model::{BoundingBox, PurpleAirError, Reading, Sensor};
use purpleair_aqi::pipeline::{self, RunError};
use purpleair_aqi::render::ScatterRenderer;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct FakeApi {
    sensors: Result<Vec<Sensor>, PurpleAirError>,
    history: HashMap<u64, Result<Vec<Reading>, PurpleAirError>>,
    history_calls: RefCell<Vec<u64>>,
    directory_calls: Cell<usize>,
}

impl FakeApi {
    fn new(sensors: Vec<Sensor>) -> Self {
        FakeApi {
            sensors: Ok(sensors),
            history: HashMap::new(),
            history_calls: RefCell::new(Vec::new()),
            directory_calls: Cell::new(0),
        }
    }

    fn failing_directory(error: PurpleAirError) -> Self {
        FakeApi {
            sensors: Err(error),
            history: HashMap::new(),
            history_calls: RefCell::new(Vec::new()),
            directory_calls: Cell::new(0),
        }
    }

    fn with_history(mut self, sensor: u64, response: Result<Vec<Reading>, PurpleAirError>) -> Self {
        self.history.insert(sensor, response);
        self
    }

    fn calls_for(&self, sensor: u64) -> usize {
        self.history_calls.borrow().iter().filter(|s| **s == sensor).count()
    }
}

impl SensorApi for FakeApi {
    fn sensors_in_box(&self, _bbox: &BoundingBox) -> Result<Vec<Sensor>, PurpleAirError> {
        self.directory_calls.set(self.directory_calls.get() + 1);
        self.sensors.clone()
    }

    fn sensor_history(
        &self,
        sensor_index: u64,
        _request: &HistoryRequest,
    ) -> Result<Vec<Reading>, PurpleAirError> {
        self.history_calls.borrow_mut().push(sensor_index);
        self.history.get(&sensor_index).cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 29, 0, 0, 0).unwrap()
}

fn sensor(index: u64, lat: f64, lng: f64) -> Sensor {
    Sensor {
        sensor_index: index,
        name: Some(format!("Golden {}", index)),
        latitude: lat,
        longitude: lng,
        pm25_current: Some(8.0),
        last_seen: Some(start()),
    }
}

fn hourly(index: u64, values: &[f64]) -> Vec<Reading> {
    values
        .iter()
        .enumerate()
        .map(|(h, pm25)| Reading {
            sensor_index: index,
            timestamp: start() + Duration::hours(h as i64),
            pm25: *pm25,
        })
        .collect()
}

fn timeout() -> PurpleAirError {
    PurpleAirError::Transport { message: "operation timed out".to_string(), timeout: true }
}

fn test_config(output: &Path, extra: &[&str]) -> Config {
    let mut args = vec![
        "--output".to_string(),
        output.to_string_lossy().into_owned(),
        "--start".to_string(),
        "2025-10-29".to_string(),
        "--end".to_string(),
        "2025-10-30".to_string(),
        "--delay-ms".to_string(),
        "0".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    let cli = CliArgs::parse(args).unwrap();
    let file = FileConfig { retry_backoff_ms: Some(0), ..FileConfig::default() };
    let env = Environment { api_key: Some("test-key".to_string()), config_path: None };
    Config::resolve(&file, &env, &cli, start()).unwrap()
}

fn offline_assembler() -> Assembler {
    Assembler {
        ffmpeg: "purpleair-test-missing-ffmpeg".to_string(),
        convert: "purpleair-test-missing-convert".to_string(),
        fps: 4,
    }
}

fn three_sensor_api() -> FakeApi {
    FakeApi::new(vec![sensor(1, 51.2, -116.8), sensor(2, 51.1, -116.5), sensor(3, 51.05, -116.2)])
        .with_history(1, Err(timeout()))
        .with_history(2, Ok(hourly(2, &[5.0, 12.0, 40.0])))
        .with_history(3, Ok(hourly(3, &[7.5, 60.0, 151.0])))
}

fn frame_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_failing_sensor_is_skipped_and_the_rest_render() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    let api = three_sensor_api();
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let summary = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler())
        .expect("run completes");

    assert_eq!(api.calls_for(1), 3, "first attempt plus two retries");
    assert_eq!(summary.sensors_with_data(), 2);
    assert_eq!(summary.sensors_skipped(), 1);
    assert!(matches!(summary.outcomes[0].outcome, SensorOutcome::Skipped { attempts: 3, .. }));

    assert_eq!(summary.frames_built, 3);
    assert_eq!(summary.frames_written, 3);
    assert_eq!(summary.frames_failed, 0);
    assert_eq!(summary.peak, Some((start() + Duration::hours(2), 201)));
    assert_eq!(
        frame_names(&dir.path().join("frames")),
        vec!["frame_0000.png", "frame_0001.png", "frame_0002.png"]
    );

    assert_eq!(
        summary.animations,
        vec![
            (AnimationFormat::Gif, EncodeOutcome::ToolMissing),
            (AnimationFormat::Mp4, EncodeOutcome::ToolMissing),
        ]
    );

    let text = fs::read_to_string(dir.path().join("data_summary.txt")).unwrap();
    assert!(text.contains("Sensors skipped: 1"));
    assert!(text.contains("1: Golden 1 (SKIPPED after 3 attempt(s)"));
    assert!(text.contains("2: Golden 2 (3 points)"));
    assert!(dir.path().join("sensors_current.csv").is_file());
    assert!(dir.path().join("readings.csv").is_file());
}

#[test]
fn test_cached_rerun_needs_no_api() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["--skip-animation"]);
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);
    let api = three_sensor_api();
    let first = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler()).unwrap();
    assert!(first.animations.is_empty(), "animation skipped on request");

    let cached = test_config(dir.path(), &["--use-cached", "--hours-interval", "2"]);
    let second = pipeline::run(&cached, None, &mut renderer, &offline_assembler())
        .expect("cache is enough");

    assert!(second.from_cache);
    assert_eq!(second.sensors_with_data(), 2);
    assert_eq!(second.sensors_without_data(), 1, "skipped sensor has no cached readings");
    assert_eq!(second.frames_built, 2, "frame step of two hours keeps hours 0 and 2");
    assert_eq!(frame_names(&dir.path().join("frames")), vec!["frame_0000.png", "frame_0001.png"]);
}

#[test]
fn test_auth_rejection_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    let api = FakeApi::failing_directory(PurpleAirError::Auth {
        status: 403,
        message: "ApiKeyInvalidError".into(),
    });
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let err = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler()).unwrap_err();
    assert!(matches!(err, RunError::Auth(_)));
    assert!(err.is_auth());
}

#[test]
fn test_auth_rejection_during_history_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    let api = FakeApi::new(vec![sensor(1, 51.2, -116.8), sensor(2, 51.1, -116.5)])
        .with_history(1, Err(PurpleAirError::Auth { status: 401, message: "missing key".into() }));
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let err = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler()).unwrap_err();
    assert!(err.is_auth());
    assert_eq!(api.calls_for(2), 0);
}

#[test]
fn test_directory_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    let api = FakeApi::failing_directory(PurpleAirError::HttpError(500));
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let err = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler()).unwrap_err();
    assert!(matches!(err, RunError::Directory(PurpleAirError::HttpError(500))));
}

#[test]
fn test_empty_region_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let api = FakeApi::new(Vec::new());
    let err = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler())
        .unwrap_err();
    assert!(matches!(err, RunError::NoSensors(_)));
}

#[test]
fn test_only_invalid_readings_is_no_frames() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &[]);
    let api = FakeApi::new(vec![sensor(1, 51.2, -116.8)])
        .with_history(1, Ok(hourly(1, &[-1.0, f64::NAN])));
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let err = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler()).unwrap_err();
    assert!(matches!(err, RunError::NoFrames));
}

#[test]
fn test_missing_key_without_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &["--use-cached"]);
    let mut renderer = ScatterRenderer::new(config.bbox, 320, 240);

    let err = pipeline::run(&config, None, &mut renderer, &offline_assembler()).unwrap_err();
    assert!(matches!(err, RunError::Config(ConfigError::MissingApiKey)));
}

#[test]
fn test_inverted_bbox_is_rejected_before_any_api_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), &[]);
    // North-west corner south of the south-east one
    config.bbox = BoundingBox { nw_lat: 51.0, nw_lng: -117.0, se_lat: 51.3, se_lng: -116.0 };
    let api = three_sensor_api();
    let valid = BoundingBox::new(51.3, -117.0, 51.0, -116.0).unwrap();
    let mut renderer = ScatterRenderer::new(valid, 320, 240);

    let err = pipeline::run(&config, Some(&api), &mut renderer, &offline_assembler()).unwrap_err();
    assert!(matches!(err, RunError::BoundingBox(_)), "got {:?}", err);
    assert_eq!(api.directory_calls.get(), 0);
    assert!(api.history_calls.borrow().is_empty());
    assert!(!dir.path().join("frames").exists());
}
