use std::process::ExitCode;

use chrono::Utc;

use purpleair_aqi::animate::Assembler;
use purpleair_aqi::cli::{CliArgs, USAGE};
use purpleair_aqi::config::{Config, Environment};
use purpleair_aqi::ingest::SensorApi;
use purpleair_aqi::ingest::purpleair::PurpleAirClient;
use purpleair_aqi::logging::{self, DataSource, LogLevel};
use purpleair_aqi::pipeline::{self, RunSummary};
use purpleair_aqi::regions::REGION_REGISTRY;
use purpleair_aqi::render::{self, ScatterRenderer};
use purpleair_aqi::verify;

const KEY_HELP: &str = "Check PURPLEAIR_API_KEY (environment or .env). \
                        Keys are issued at https://develop.purpleair.com/";

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    if cli.help {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    if cli.list_regions {
        println!("Built-in regions:");
        for region in REGION_REGISTRY {
            println!("  {:<12} {} {}", region.name, region.title, region.bounding_box());
        }
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&cli, &Environment::from_process(), Utc::now()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let level = if config.verbose { LogLevel::Debug } else { LogLevel::Info };
    logging::init_logger(level, config.log_file.as_deref(), false);

    println!("🌫  PurpleAir AQI Animation");
    println!("   Region: {} {}", config.region_title, config.bbox);
    println!(
        "   Period: {} to {} ({}-minute average)",
        config.start.format("%Y-%m-%d %H:%M"),
        config.end.format("%Y-%m-%d %H:%M"),
        config.average.minutes()
    );
    println!("   Output: {}", config.output_dir.display());
    println!();

    let client = match &config.api_key {
        Some(key) => match PurpleAirClient::new(key, config.request_timeout) {
            Ok(client) => Some(client.with_base_url(&config.base_url)),
            Err(e) => {
                let message = format!("could not build HTTP client: {}", e);
                logging::error(DataSource::System, None, &message);
                return ExitCode::from(1);
            }
        },
        None => None,
    };

    if cli.check_key {
        let Some(client) = client else {
            eprintln!("❌ {}", purpleair_aqi::config::ConfigError::MissingApiKey);
            return ExitCode::from(1);
        };
        println!("🔍 Verifying API access...");
        let report = verify::run_verification(&client, &config.bbox, &config.region_title);
        return if report.passed() { ExitCode::SUCCESS } else { ExitCode::from(1) };
    }

    if !render::register_font(config.font_path.as_deref()) {
        println!("   ⚠ No TrueType font found; frames will have no labels (set font_path)");
    }
    let mut renderer = ScatterRenderer::new(config.bbox, config.frame_width, config.frame_height)
        .with_title(&config.region_title)
        .with_time_range(config.start, config.end);
    let assembler = Assembler::new(config.fps);
    let api = client.as_ref().map(|c| c as &dyn SensorApi);

    match pipeline::run(&config, api, &mut renderer, &assembler) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            logging::error(DataSource::System, None, &e.to_string());
            if e.is_auth() {
                eprintln!("   {}", KEY_HELP);
            }
            ExitCode::from(1)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("✅ Done");
    println!(
        "   Sensors: {} with data, {} without data, {} skipped",
        summary.sensors_with_data(),
        summary.sensors_without_data(),
        summary.sensors_skipped()
    );
    println!(
        "   Frames: {} written, {} failed",
        summary.frames_written, summary.frames_failed
    );
    if let Some((when, aqi)) = summary.peak {
        println!("   Peak AQI: {} at {}", aqi, when.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("   Output: {}", summary.output_dir.display());
}
