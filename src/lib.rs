//! PurpleAir PM2.5 history to animated AQI maps.
//!
//! Pipeline: `ingest` (sensor directory and rate-limited history fetch),
//! `aqi` (EPA breakpoint conversion), `analysis::frames` (per-timestamp
//! frames), `render` (PNG per frame), `animate` (ffmpeg/ImageMagick), with
//! `output` writing the CSVs and run summary. `pipeline::run` ties them
//! together from a `config::Config`.

pub mod analysis;
pub mod animate;
pub mod aqi;
pub mod cli;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod regions;
pub mod render;
pub mod verify;
