//! End-to-end run: directory, history, frames, images, animation, summary.
//!
//! Every stage after the directory fetch degrades instead of aborting: a
//! skipped sensor, a dropped reading, a failed frame or a missing encoder is
//! counted in the `RunSummary`. Fatal outcomes are the `RunError` variants.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::analysis::frames::build_frames;
use crate::animate::{AnimationFormat, Assembler, EncodeOutcome};
use crate::config::{Config, ConfigError};
use crate::ingest::SensorApi;
use crate::ingest::history::{FetchSettings, SensorFetch, SensorOutcome, fetch_history};
use crate::logging::{self, DataSource};
use crate::model::{BoundingBox, BoundingBoxError, FIELD_PM25_ATM, PurpleAirError, Reading, Sensor};
use crate::output::{self, CacheError};
use crate::render::{FrameRenderer, RenderError, render_frames};

pub const FRAMES_DIR: &str = "frames";
pub const SENSORS_CSV: &str = "sensors_current.csv";
pub const READINGS_CSV: &str = "readings.csv";
pub const SUMMARY_FILE: &str = "data_summary.txt";
pub const ANIMATION_STEM: &str = "aqi_animation";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("invalid bounding box: {0}")]
    BoundingBox(#[from] BoundingBoxError),

    #[error("PurpleAir rejected the API key: {0}")]
    Auth(PurpleAirError),

    #[error("sensor directory fetch failed: {0}")]
    Directory(PurpleAirError),

    #[error("no outdoor sensors found in {0}")]
    NoSensors(BoundingBox),

    #[error("no frames to render: none of the fetched readings were usable")]
    NoFrames,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RunError::Auth(_) | RunError::Config(ConfigError::MissingApiKey))
    }
}

/// Files of one run under the output directory.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub root: PathBuf,
    pub frames_dir: PathBuf,
    pub sensors_csv: PathBuf,
    pub readings_csv: PathBuf,
    pub summary: PathBuf,
    pub animation_stem: PathBuf,
}

impl OutputPaths {
    pub fn new(root: &Path) -> Self {
        OutputPaths {
            root: root.to_path_buf(),
            frames_dir: root.join(FRAMES_DIR),
            sensors_csv: root.join(SENSORS_CSV),
            readings_csv: root.join(READINGS_CSV),
            summary: root.join(SUMMARY_FILE),
            animation_stem: root.join(ANIMATION_STEM),
        }
    }

    pub fn has_cache(&self) -> bool {
        self.sensors_csv.is_file() && self.readings_csv.is_file()
    }
}

/// Everything reported at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub region_title: String,
    pub bbox: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub average_minutes: u32,
    pub from_cache: bool,
    /// One entry per sensor in the directory, in directory order.
    pub outcomes: Vec<SensorFetch>,
    pub dropped_readings: usize,
    pub frames_built: usize,
    pub frames_written: usize,
    pub frames_failed: usize,
    /// Highest single-sensor AQI and the frame it appeared in.
    pub peak: Option<(DateTime<Utc>, u16)>,
    pub animations: Vec<(AnimationFormat, EncodeOutcome)>,
    pub output_dir: PathBuf,
}

impl RunSummary {
    pub fn sensors_with_data(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, SensorOutcome::Fetched { .. }))
            .count()
    }

    pub fn sensors_without_data(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == SensorOutcome::NoData).count()
    }

    pub fn sensors_skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, SensorOutcome::Skipped { .. }))
            .count()
    }
}

/// Runs the whole pipeline.
///
/// `api` may be `None` only when `config.use_cached` is set and a cache
/// exists. With `config.skip_animation` the assembler is not invoked.
pub fn run(
    config: &Config,
    api: Option<&dyn SensorApi>,
    renderer: &mut dyn FrameRenderer,
    assembler: &Assembler,
) -> Result<RunSummary, RunError> {
    config.bbox.validate()?;
    let paths = OutputPaths::new(&config.output_dir);
    fs::create_dir_all(&paths.root)?;

    let from_cache = config.use_cached && paths.has_cache();
    if config.use_cached && !from_cache {
        logging::warn(
            DataSource::Cache,
            None,
            &format!("no cached CSVs in {}; fetching from the API", paths.root.display()),
        );
    }

    let (sensors, series, outcomes) = if from_cache {
        load_cached(&paths)?
    } else {
        let api = api.ok_or(RunError::Config(ConfigError::MissingApiKey))?;
        fetch_fresh(config, api, &paths)?
    };

    logging::info(DataSource::Aqi, None, "Converting readings to AQI and building frames...");
    let frame_set = build_frames(&sensors, &series, config.frame_step());
    if !frame_set.dropped.is_empty() {
        logging::warn(
            DataSource::Aqi,
            None,
            &format!("{} invalid reading(s) dropped", frame_set.dropped.len()),
        );
    }
    if frame_set.frames.is_empty() {
        return Err(RunError::NoFrames);
    }
    logging::info(
        DataSource::Aqi,
        None,
        &format!(
            "{} frames from {} to {}",
            frame_set.frames.len(),
            frame_set.frames[0].timestamp.format("%Y-%m-%d %H:%M"),
            frame_set.frames[frame_set.frames.len() - 1].timestamp.format("%Y-%m-%d %H:%M")
        ),
    );

    let peak = frame_set
        .frames
        .iter()
        .map(|f| (f.timestamp, f.stats.max))
        .max_by_key(|(_, max)| *max);

    let report = render_frames(renderer, &frame_set.frames, &paths.frames_dir)?;

    let animations = if config.skip_animation {
        logging::info(DataSource::Encoder, None, "Skipping animation (--skip-animation)");
        Vec::new()
    } else if report.written.is_empty() {
        logging::warn(DataSource::Encoder, None, "No frames were written; nothing to animate");
        Vec::new()
    } else {
        logging::info(
            DataSource::Encoder,
            None,
            &format!(
                "Creating animations from {} frames at {} fps...",
                report.written.len(),
                assembler.fps
            ),
        );
        assembler.assemble(&paths.frames_dir, &paths.animation_stem, &config.formats)
    };

    let summary = RunSummary {
        region_title: config.region_title.clone(),
        bbox: config.bbox,
        start: config.start,
        end: config.end,
        average_minutes: config.average.minutes(),
        from_cache,
        outcomes,
        dropped_readings: frame_set.dropped.len(),
        frames_built: frame_set.frames.len(),
        frames_written: report.written.len(),
        frames_failed: report.failed.len(),
        peak,
        animations,
        output_dir: paths.root.clone(),
    };
    output::write_summary(&paths.summary, &summary)?;
    logging::info(
        DataSource::System,
        None,
        &format!("Summary written to {}", paths.summary.display()),
    );

    Ok(summary)
}

type StageData = (Vec<Sensor>, BTreeMap<u64, Vec<Reading>>, Vec<SensorFetch>);

fn fetch_fresh(
    config: &Config,
    api: &dyn SensorApi,
    paths: &OutputPaths,
) -> Result<StageData, RunError> {
    logging::info(
        DataSource::PurpleAir,
        None,
        &format!("Finding sensors in {} {}...", config.region_title, config.bbox),
    );
    let sensors = api.sensors_in_box(&config.bbox).map_err(|e| {
        if e.is_auth() { RunError::Auth(e) } else { RunError::Directory(e) }
    })?;
    if sensors.is_empty() {
        return Err(RunError::NoSensors(config.bbox));
    }
    logging::info(DataSource::PurpleAir, None, &format!("Found {} sensors", sensors.len()));

    output::write_sensors_csv(&paths.sensors_csv, &sensors)?;

    let settings = FetchSettings {
        start: config.start,
        end: config.end,
        average: config.average,
        field: FIELD_PM25_ATM.to_string(),
        rate_limit_delay: config.rate_limit_delay,
        max_retries: config.max_retries,
        retry_backoff: config.retry_backoff,
    };
    let report = fetch_history(api, &sensors, &settings).map_err(RunError::Auth)?;

    output::write_readings_csv(&paths.readings_csv, &report.series)?;
    logging::info(
        DataSource::Cache,
        None,
        &format!("{} readings saved to {}", report.total_readings(), paths.readings_csv.display()),
    );

    Ok((sensors, report.series, report.outcomes))
}

fn load_cached(paths: &OutputPaths) -> Result<StageData, RunError> {
    let sensors = output::load_sensors_csv(&paths.sensors_csv)?;
    let series = output::load_readings_csv(&paths.readings_csv)?;
    logging::info(
        DataSource::Cache,
        None,
        &format!(
            "Loaded {} sensors and {} readings from {}",
            sensors.len(),
            series.values().map(Vec::len).sum::<usize>(),
            paths.root.display()
        ),
    );

    let outcomes = sensors
        .iter()
        .map(|sensor| SensorFetch {
            sensor_index: sensor.sensor_index,
            name: sensor.display_name(),
            outcome: match series.get(&sensor.sensor_index) {
                Some(readings) => SensorOutcome::Fetched { readings: readings.len() },
                None => SensorOutcome::NoData,
            },
        })
        .collect();
    Ok((sensors, series, outcomes))
}
