//! Run configuration.
//!
//! Layers, lowest to highest precedence: built-in defaults, the TOML config
//! file, the environment (`PURPLEAIR_API_KEY`, `PURPLEAIR_CONFIG`), and the
//! command line. The merged `Config` is the only place the rest of the crate
//! reads settings from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::animate::AnimationFormat;
use crate::cli::CliArgs;
use crate::ingest::AveragingInterval;
use crate::ingest::purpleair::PURPLEAIR_BASE_URL;
use crate::model::{BoundingBox, BoundingBoxError};
use crate::regions::{self, DEFAULT_REGION};

pub const DEFAULT_CONFIG_FILE: &str = "purpleair.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp/purple-air";
pub const DEFAULT_DAYS: u32 = 7;
pub const DEFAULT_HOURS_INTERVAL: u32 = 1;
pub const DEFAULT_AVERAGE_MINUTES: u32 = 60;
pub const DEFAULT_FPS: u32 = 4;
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FRAME_WIDTH: u32 = 1000;
pub const DEFAULT_FRAME_HEIGHT: u32 = 800;

const MAX_DAYS: u32 = 365;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bounding box: {0}")]
    BoundingBox(#[from] BoundingBoxError),

    #[error("unknown region '{name}' (known regions: {known})")]
    UnknownRegion { name: String, known: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("start ({start}) must be before end ({end})")]
    InvalidRange { start: DateTime<Utc>, end: DateTime<Utc> },

    #[error("could not read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("could not parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error(
        "PURPLEAIR_API_KEY is not set. Request a read key at https://develop.purpleair.com/ \
         and put it in the environment or a .env file"
    )]
    MissingApiKey,
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), message: message.into() }
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub region: Option<String>,
    pub days: Option<u32>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub hours_interval: Option<u32>,
    pub average: Option<u32>,
    pub fps: Option<u32>,
    pub output_dir: Option<String>,
    pub rate_limit_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub base_url: Option<String>,
    pub log_file: Option<String>,
    pub formats: Option<Vec<String>>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    /// TrueType font for frame labels; common system fonts are tried otherwise.
    pub font_path: Option<String>,
    pub bbox: Option<BoxTable>,
    pub regions: HashMap<String, RegionTable>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct BoxTable {
    pub nw_lat: f64,
    pub nw_lng: f64,
    pub se_lat: f64,
    pub se_lng: f64,
}

impl BoxTable {
    fn bounding_box(&self) -> Result<BoundingBox, BoundingBoxError> {
        BoundingBox::new(self.nw_lat, self.nw_lng, self.se_lat, self.se_lng)
    }
}

/// A user region declared as `[regions.<name>]`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegionTable {
    pub title: Option<String>,
    #[serde(flatten)]
    pub corners: BoxTable,
}

impl FileConfig {
    pub fn from_toml_str(text: &str, path: &str) -> Result<FileConfig, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<FileConfig, ConfigError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        FileConfig::from_toml_str(&text, &display)
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Values taken from the process environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub api_key: Option<String>,
    pub config_path: Option<String>,
}

impl Environment {
    /// Reads the environment. Call after `dotenv` so `.env` values apply.
    pub fn from_process() -> Environment {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Environment {
            api_key: non_empty("PURPLEAIR_API_KEY"),
            config_path: non_empty("PURPLEAIR_CONFIG"),
        }
    }
}

// ---------------------------------------------------------------------------
// Merged configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub region_title: String,
    pub bbox: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub average: AveragingInterval,
    /// Minimum hours between frames; 0 keeps every timestamp.
    pub frame_step_hours: u32,
    pub fps: u32,
    pub output_dir: PathBuf,
    pub rate_limit_delay: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    pub formats: Vec<AnimationFormat>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub font_path: Option<PathBuf>,
    pub use_cached: bool,
    pub skip_animation: bool,
    pub log_file: Option<String>,
    pub verbose: bool,
}

impl Config {
    /// Reads the config file named by the CLI or environment (or the default
    /// file if present), then merges all layers.
    pub fn load(
        cli: &CliArgs,
        env: &Environment,
        now: DateTime<Utc>,
    ) -> Result<Config, ConfigError> {
        let explicit = cli.config.as_ref().or(env.config_path.as_ref());
        let file = match explicit {
            Some(path) => FileConfig::load(Path::new(path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                FileConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => FileConfig::default(),
        };
        Config::resolve(&file, env, cli, now)
    }

    pub fn resolve(
        file: &FileConfig,
        env: &Environment,
        cli: &CliArgs,
        now: DateTime<Utc>,
    ) -> Result<Config, ConfigError> {
        let (region_title, bbox) = resolve_region(file, cli)?;

        let days = match &cli.days {
            Some(v) => parse_number::<u32>("--days", v)?,
            None => file.days.unwrap_or(DEFAULT_DAYS),
        };
        if days == 0 || days > MAX_DAYS {
            return Err(invalid("days", format!("must be between 1 and {}", MAX_DAYS)));
        }

        let start = match cli.start.as_deref().or(file.start.as_deref()) {
            Some(v) => Some(parse_date("start", v)?),
            None => None,
        };
        let end = match cli.end.as_deref().or(file.end.as_deref()) {
            Some(v) => Some(parse_date("end", v)?),
            None => None,
        };
        let (start, end) = resolve_range(start, end, days, now);
        if start >= end {
            return Err(ConfigError::InvalidRange { start, end });
        }

        let average_minutes = match &cli.average {
            Some(v) => parse_number::<u32>("--average", v)?,
            None => file.average.unwrap_or(DEFAULT_AVERAGE_MINUTES),
        };
        let average = AveragingInterval::from_minutes(average_minutes).ok_or_else(|| {
            invalid("average", format!("{} (expected 0, 10, 30 or 60)", average_minutes))
        })?;

        let frame_step_hours = match &cli.hours_interval {
            Some(v) => parse_number::<u32>("--hours-interval", v)?,
            None => file.hours_interval.unwrap_or(DEFAULT_HOURS_INTERVAL),
        };

        let fps = match &cli.fps {
            Some(v) => parse_number::<u32>("--fps", v)?,
            None => file.fps.unwrap_or(DEFAULT_FPS),
        };
        if fps == 0 || fps > 60 {
            return Err(invalid("fps", "must be between 1 and 60"));
        }

        let delay_ms = match &cli.delay_ms {
            Some(v) => parse_number::<u64>("--delay-ms", v)?,
            None => file.rate_limit_delay_ms.unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS),
        };

        let formats = match &file.formats {
            Some(names) => names
                .iter()
                .map(|n| {
                    AnimationFormat::parse(n)
                        .ok_or_else(|| invalid("formats", format!("unknown format '{}'", n)))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![AnimationFormat::Gif, AnimationFormat::Mp4],
        };

        let output_dir = cli
            .output
            .clone()
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());

        Ok(Config {
            api_key: env.api_key.clone(),
            base_url: file.base_url.clone().unwrap_or_else(|| PURPLEAIR_BASE_URL.to_string()),
            region_title,
            bbox,
            start,
            end,
            average,
            frame_step_hours,
            fps,
            output_dir: PathBuf::from(output_dir),
            rate_limit_delay: Duration::from_millis(delay_ms),
            max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_backoff: Duration::from_millis(
                file.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS).max(1),
            ),
            formats,
            frame_width: file.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH),
            frame_height: file.frame_height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            font_path: file.font_path.as_ref().map(PathBuf::from),
            use_cached: cli.use_cached,
            skip_animation: cli.skip_animation,
            log_file: file.log_file.clone(),
            verbose: cli.verbose,
        })
    }

    /// The API key, or the error telling the user how to get one.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    pub fn frame_step(&self) -> Option<chrono::Duration> {
        (self.frame_step_hours > 0)
            .then(|| chrono::Duration::hours(i64::from(self.frame_step_hours)))
    }
}

/// Picks the bounding box: `--bbox`, `--region`, file `[bbox]`, file
/// `region`, then the default region. Region names are looked up among the
/// file's `[regions.*]` first, then the built-in registry.
pub fn resolve_region(
    file: &FileConfig,
    cli: &CliArgs,
) -> Result<(String, BoundingBox), ConfigError> {
    if let Some(raw) = &cli.bbox {
        return Ok(("Custom region".to_string(), BoundingBox::parse(raw)?));
    }
    if let Some(name) = &cli.region {
        return lookup_region(file, name);
    }
    if let Some(table) = &file.bbox {
        return Ok(("Custom region".to_string(), table.bounding_box()?));
    }
    lookup_region(file, file.region.as_deref().unwrap_or(DEFAULT_REGION))
}

fn lookup_region(file: &FileConfig, name: &str) -> Result<(String, BoundingBox), ConfigError> {
    let user = file
        .regions
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()));
    if let Some((key, table)) = user {
        let title = table.title.clone().unwrap_or_else(|| key.clone());
        return Ok((title, table.corners.bounding_box()?));
    }
    if let Some(region) = regions::find_region(name) {
        let bbox = region.bounding_box();
        bbox.validate()?;
        return Ok((region.title.to_string(), bbox));
    }

    let mut known: Vec<String> =
        regions::all_region_names().iter().map(|s| s.to_string()).collect();
    known.extend(file.regions.keys().cloned());
    known.sort();
    Err(ConfigError::UnknownRegion { name: name.to_string(), known: known.join(", ") })
}

/// Start and end from optional dates: both given are used as is; a start
/// alone runs `days` forward; otherwise the range ends at `end` (or now).
fn resolve_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    days: u32,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let span = chrono::Duration::days(i64::from(days));
    match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start + span),
        (None, end) => {
            let end = end.unwrap_or(now);
            (end - span, end)
        }
    }
}

fn parse_date(key: &str, value: &str) -> Result<DateTime<Utc>, ConfigError> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| invalid(key, format!("'{}' is not a YYYY-MM-DD date", value)))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| invalid(key, format!("'{}' is not a valid date", value)))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, format!("'{}' is not a valid number", value)))
}
