//! Command-line parsing.
//!
//! Every value flag accepts both `--flag value` and `--flag=value`. Values are
//! kept as given; typing and range checks happen in `config`, where the
//! file and environment layers are merged in.

use std::fmt;

pub const USAGE: &str = "\
Usage: purpleair_aqi [OPTIONS]

Fetch historical PurpleAir PM2.5 readings for a region, convert them to EPA
AQI and render an animated map (GIF and MP4).

Time range:
  --days N                 Days of history to fetch (default 7)
  --start YYYY-MM-DD       Start date (UTC); end defaults to start + days
  --end YYYY-MM-DD         End date (UTC); defaults to now
  --average MIN            Averaging interval: 0, 10, 30 or 60 (default 60)
  --hours-interval N       Minimum hours between frames, 0 = every reading (default 1)

Region:
  --region NAME            Named region (see --list-regions; default golden)
  --bbox NWLAT,NWLNG,SELAT,SELNG
                           Explicit bounding box, overrides --region

Output:
  --output DIR             Output directory (default /tmp/purple-air)
  --fps N                  Animation frames per second (default 4)
  --skip-animation         Render frames but do not encode GIF/MP4
  --use-cached             Re-render from the CSVs of a previous run

Other:
  --config PATH            TOML config file (default ./purpleair.toml if present)
  --delay-ms MS            Pause between API requests (default 500)
  --check-key              Verify PURPLEAIR_API_KEY and the region, then exit
  --list-regions           List built-in regions and exit
  --verbose                Debug logging
  --help                   Show this help

Environment:
  PURPLEAIR_API_KEY        API read key (also read from .env)
  PURPLEAIR_CONFIG         Config file path
";

/// Raw command-line values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub days: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub hours_interval: Option<String>,
    pub average: Option<String>,
    pub fps: Option<String>,
    pub region: Option<String>,
    pub bbox: Option<String>,
    pub output: Option<String>,
    pub config: Option<String>,
    pub delay_ms: Option<String>,
    pub use_cached: bool,
    pub skip_animation: bool,
    pub check_key: bool,
    pub list_regions: bool,
    pub verbose: bool,
    pub help: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliError {
    UnknownFlag(String),
    MissingValue(String),
    UnexpectedValue(String),
    UnexpectedArgument(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::UnknownFlag(flag) => write!(f, "unknown option '{}'", flag),
            CliError::MissingValue(flag) => write!(f, "option '{}' requires a value", flag),
            CliError::UnexpectedValue(flag) => write!(f, "option '{}' does not take a value", flag),
            CliError::UnexpectedArgument(arg) => write!(f, "unexpected argument '{}'", arg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliArgs {
    /// Parses arguments, excluding the program name.
    pub fn parse<I>(args: I) -> Result<CliArgs, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            if !arg.starts_with("--") {
                return Err(CliError::UnexpectedArgument(arg));
            }
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg.clone(), None),
            };

            if let Some(slot) = parsed.switch(&flag) {
                if inline.is_some() {
                    return Err(CliError::UnexpectedValue(flag));
                }
                *slot = true;
                continue;
            }

            let value = match inline {
                Some(v) => v,
                None => args.next().ok_or_else(|| CliError::MissingValue(flag.clone()))?,
            };
            match parsed.value_slot(&flag) {
                Some(slot) => *slot = Some(value),
                None => return Err(CliError::UnknownFlag(flag)),
            }
        }
        Ok(parsed)
    }

    fn switch(&mut self, flag: &str) -> Option<&mut bool> {
        match flag {
            "--use-cached" => Some(&mut self.use_cached),
            "--skip-animation" => Some(&mut self.skip_animation),
            "--check-key" => Some(&mut self.check_key),
            "--list-regions" => Some(&mut self.list_regions),
            "--verbose" => Some(&mut self.verbose),
            "--help" => Some(&mut self.help),
            _ => None,
        }
    }

    fn value_slot(&mut self, flag: &str) -> Option<&mut Option<String>> {
        match flag {
            "--days" => Some(&mut self.days),
            "--start" => Some(&mut self.start),
            "--end" => Some(&mut self.end),
            "--hours-interval" => Some(&mut self.hours_interval),
            "--average" => Some(&mut self.average),
            "--fps" => Some(&mut self.fps),
            "--region" => Some(&mut self.region),
            "--bbox" => Some(&mut self.bbox),
            "--output" => Some(&mut self.output),
            "--config" => Some(&mut self.config),
            "--delay-ms" => Some(&mut self.delay_ms),
            _ => None,
        }
    }
}
