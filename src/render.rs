//! Frame rendering.
//!
//! Draws each `Frame` as a scatter map with `plotters`: sensors are
//! category-colored circles with black outlines at their longitude/latitude
//! inside the padded bounding box, labelled with their AQI. The caption
//! carries the region and timestamp, a stats box the frame statistics, and a
//! legend the six categories with their AQI ranges. A strip along the bottom
//! edge shows how far into the run the frame is. Files are named
//! `frame_NNNN.png` so that filename order is playback order.
//!
//! Text needs a TrueType font registered with [`register_font`]. Without one
//! the frame is still drawn, minus every label.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use image::RgbImage;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontStyle;

use crate::aqi;
use crate::logging::{self, DataSource};
use crate::model::{AqiCategory, BoundingBox, Frame, FramePoint};

/// Pattern the animation assembler globs for.
pub const FRAME_GLOB: &str = "frame_*.png";

/// Degrees of padding drawn around the bounding box.
pub const MAP_MARGIN_DEG: f64 = 0.02;

/// Font family every label is drawn with.
pub const FONT_FAMILY: &str = "sans-serif";

const MIN_WIDTH: u32 = 200;
const MIN_HEIGHT: u32 = 150;
/// Narrower frames are drawn without labels; the legend text alone needs
/// most of this.
const TEXT_MIN_WIDTH: u32 = 480;
const LEGEND_WIDTH_TEXT: i32 = 240;
const LEGEND_WIDTH_PLAIN: i32 = 30;
const LEGEND_ROW: i32 = 18;
const SWATCH: i32 = 12;
const TIMELINE_HEIGHT: i32 = 5;

/// Looked up in order when no font path is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static FONT_READY: OnceLock<bool> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("drawing failed: {0}")]
    Draw(String),

    #[error("frame buffer does not match {width}x{height}")]
    Buffer { width: u32, height: u32 },

    #[error("could not encode frame image: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn draw_error<E: std::fmt::Display>(err: E) -> RenderError {
    RenderError::Draw(err.to_string())
}

/// Something that can turn a frame into an image file.
pub trait FrameRenderer {
    fn render(&mut self, frame: &Frame, path: &Path) -> Result<(), RenderError>;
}

/// File name of the `n`th frame.
pub fn frame_file_name(n: usize) -> String {
    format!("frame_{:04}.png", n)
}

/// Registers a TrueType font as [`FONT_FAMILY`]. `path` wins over the
/// built-in candidate list. Only the first call in a process has an effect;
/// later calls return its result.
pub fn register_font(path: Option<&Path>) -> bool {
    *FONT_READY.get_or_init(|| {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => FONT_CANDIDATES.iter().map(PathBuf::from).collect(),
        };
        for candidate in candidates {
            let Ok(bytes) = fs::read(&candidate) else {
                continue;
            };
            // plotters keeps registered fonts for the life of the process
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                logging::debug(
                    DataSource::Render,
                    None,
                    &format!("using font {}", candidate.display()),
                );
                return true;
            }
        }
        logging::warn(
            DataSource::Render,
            None,
            "no usable TrueType font found; frames are drawn without labels",
        );
        false
    })
}

fn font(size: u32) -> TextStyle<'static> {
    (FONT_FAMILY, size).into_font().color(&BLACK)
}

fn category_color(category: AqiCategory) -> RGBColor {
    let [r, g, b] = category.color();
    RGBColor(r, g, b)
}

// ---------------------------------------------------------------------------
// Scatter renderer
// ---------------------------------------------------------------------------

pub struct ScatterRenderer {
    bbox: BoundingBox,
    width: u32,
    height: u32,
    marker_radius: i32,
    title: String,
    time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Cleared after the first text failure so later frames skip labels.
    text: bool,
}

impl ScatterRenderer {
    pub fn new(bbox: BoundingBox, width: u32, height: u32) -> Self {
        ScatterRenderer {
            bbox,
            width: width.max(MIN_WIDTH),
            height: height.max(MIN_HEIGHT),
            marker_radius: 10,
            title: String::new(),
            time_range: None,
            text: register_font(None),
        }
    }

    /// Region name shown in the caption.
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Run period the bottom progress strip is measured against.
    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some((start, end));
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Padded plot bounds as (west, east, south, north).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.bbox.nw_lng - MAP_MARGIN_DEG,
            self.bbox.se_lng + MAP_MARGIN_DEG,
            self.bbox.se_lat - MAP_MARGIN_DEG,
            self.bbox.nw_lat + MAP_MARGIN_DEG,
        )
    }

    pub fn caption(&self, frame: &Frame) -> String {
        let when = frame.timestamp.format("%Y-%m-%d %H:%M UTC");
        if self.title.is_empty() {
            format!("PurpleAir AQI - {}", when)
        } else {
            format!("PurpleAir AQI - {} - {}", self.title, when)
        }
    }

    /// Fraction of the run elapsed at `timestamp`, if a range is set.
    pub fn progress(&self, timestamp: DateTime<Utc>) -> Option<f64> {
        let (start, end) = self.time_range?;
        let total = (end - start).num_seconds();
        if total <= 0 {
            return None;
        }
        let elapsed = (timestamp - start).num_seconds();
        Some((elapsed as f64 / total as f64).clamp(0.0, 1.0))
    }

    fn legend_width(&self, with_text: bool) -> i32 {
        if with_text { LEGEND_WIDTH_TEXT } else { LEGEND_WIDTH_PLAIN }
    }

    fn draw_buffer(&self, frame: &Frame, text: bool) -> Result<Vec<u8>, RenderError> {
        let with_text = text && self.width >= TEXT_MIN_WIDTH;
        let mut buffer = vec![255u8; self.width as usize * self.height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height))
                .into_drawing_area();
            root.fill(&WHITE).map_err(draw_error)?;

            let (west, east, south, north) = self.bounds();
            let mut builder = ChartBuilder::on(&root);
            builder.margin(10).margin_right(self.legend_width(with_text));
            if with_text {
                builder
                    .caption(self.caption(frame), font(18))
                    .x_label_area_size(35)
                    .y_label_area_size(50);
            }
            let mut chart = builder
                .build_cartesian_2d(west..east, south..north)
                .map_err(draw_error)?;

            let degrees = |v: &f64| format!("{:.2}", v);
            let mut mesh = chart.configure_mesh();
            mesh.light_line_style(BLACK.mix(0.05))
                .bold_line_style(BLACK.mix(0.15));
            if with_text {
                mesh.x_desc("Longitude")
                    .y_desc("Latitude")
                    .x_label_formatter(&degrees)
                    .y_label_formatter(&degrees)
                    .label_style(font(11));
            }
            mesh.draw().map_err(draw_error)?;

            let at = |p: &FramePoint| (p.sensor.longitude, p.sensor.latitude);
            chart
                .draw_series(
                    frame
                        .points
                        .iter()
                        .map(|p| Circle::new(at(p), self.marker_radius + 2, BLACK.filled())),
                )
                .map_err(draw_error)?;
            chart
                .draw_series(frame.points.iter().map(|p| {
                    Circle::new(at(p), self.marker_radius, category_color(p.aqi.category).filled())
                }))
                .map_err(draw_error)?;
            if with_text {
                let label = font(10).pos(Pos::new(HPos::Center, VPos::Center));
                chart
                    .draw_series(
                        frame
                            .points
                            .iter()
                            .map(|p| Text::new(p.aqi.aqi.to_string(), at(p), label.clone())),
                    )
                    .map_err(draw_error)?;
            }

            self.draw_legend(&root, with_text)?;
            self.draw_stats(&root, frame, with_text)?;
            self.draw_timeline(&root, frame.timestamp)?;
            root.present().map_err(draw_error)?;
        }
        Ok(buffer)
    }

    fn draw_legend(
        &self,
        root: &DrawingArea<BitMapBackend<'_>, Shift>,
        with_text: bool,
    ) -> Result<(), RenderError> {
        let width = self.width as i32;
        let x0 = width - self.legend_width(with_text) + 6;
        let y0 = 40;
        let rows = AqiCategory::ALL.len() as i32;

        if with_text {
            let border = [(x0 - 6, y0 - 6), (width - 12, y0 + rows * LEGEND_ROW)];
            root.draw(&Rectangle::new(border, WHITE.mix(0.85).filled()))
                .map_err(draw_error)?;
            root.draw(&Rectangle::new(border, BLACK.mix(0.4)))
                .map_err(draw_error)?;
        }

        let text = font(11).pos(Pos::new(HPos::Left, VPos::Center));
        for (row, category) in AqiCategory::ALL.iter().enumerate() {
            let y = y0 + row as i32 * LEGEND_ROW;
            draw_swatch(root, x0, y, category_color(*category))?;
            if with_text {
                let label = format!("{} ({})", category.label(), category.range_label());
                root.draw(&Text::new(label, (x0 + SWATCH + 6, y + SWATCH / 2), text.clone()))
                    .map_err(draw_error)?;
            }
        }
        Ok(())
    }

    fn draw_stats(
        &self,
        root: &DrawingArea<BitMapBackend<'_>, Shift>,
        frame: &Frame,
        with_text: bool,
    ) -> Result<(), RenderError> {
        let stats = &frame.stats;
        let x0 = 70;
        let y0 = self.height as i32 - 70;
        let mean_category = aqi::category_for_aqi(stats.mean.round() as u16);

        if with_text {
            let line = format!(
                "Sensors: {} | Average AQI: {:.0} | Min: {} | Max: {}",
                stats.count, stats.mean, stats.min, stats.max
            );
            let plot_right = self.width as i32 - self.legend_width(true);
            let box_width = (plot_right - x0 - 10).min(340);
            let frame_box = [(x0 - 6, y0 - 6), (x0 + box_width, y0 + SWATCH + 6)];
            root.draw(&Rectangle::new(frame_box, WHITE.mix(0.85).filled()))
                .map_err(draw_error)?;
            root.draw(&Rectangle::new(frame_box, BLACK.mix(0.4)))
                .map_err(draw_error)?;
            root.draw(&Text::new(
                line,
                (x0 + SWATCH + 6, y0 + SWATCH / 2),
                font(11).pos(Pos::new(HPos::Left, VPos::Center)),
            ))
            .map_err(draw_error)?;
        }
        draw_swatch(root, x0, y0, category_color(mean_category))
    }

    fn draw_timeline(
        &self,
        root: &DrawingArea<BitMapBackend<'_>, Shift>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), RenderError> {
        let Some(progress) = self.progress(timestamp) else {
            return Ok(());
        };
        let (width, height) = (self.width as i32, self.height as i32);
        let top = height - TIMELINE_HEIGHT;
        root.draw(&Rectangle::new([(0, top), (width, height)], BLACK.mix(0.1).filled()))
            .map_err(draw_error)?;
        let filled = (f64::from(width) * progress).round() as i32;
        if filled > 0 {
            root.draw(&Rectangle::new([(0, top), (filled, height)], BLACK.mix(0.6).filled()))
                .map_err(draw_error)?;
        }
        Ok(())
    }
}

fn draw_swatch(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    x: i32,
    y: i32,
    color: RGBColor,
) -> Result<(), RenderError> {
    root.draw(&Rectangle::new([(x, y), (x + SWATCH, y + SWATCH)], BLACK.filled()))
        .map_err(draw_error)?;
    root.draw(&Rectangle::new(
        [(x + 1, y + 1), (x + SWATCH - 1, y + SWATCH - 1)],
        color.filled(),
    ))
    .map_err(draw_error)?;
    Ok(())
}

impl FrameRenderer for ScatterRenderer {
    fn render(&mut self, frame: &Frame, path: &Path) -> Result<(), RenderError> {
        let buffer = match self.draw_buffer(frame, self.text) {
            Ok(buffer) => buffer,
            Err(e) if self.text && self.width >= TEXT_MIN_WIDTH => {
                logging::warn(
                    DataSource::Render,
                    None,
                    &format!("text rendering failed ({}); continuing without labels", e),
                );
                self.text = false;
                self.draw_buffer(frame, false)?
            }
            Err(e) => return Err(e),
        };

        let img = RgbImage::from_raw(self.width, self.height, buffer).ok_or(
            RenderError::Buffer {
                width: self.width,
                height: self.height,
            },
        )?;
        img.save(path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frame directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RenderReport {
    /// Written files, in playback order.
    pub written: Vec<PathBuf>,
    /// Timestamps of frames that failed, with the error text.
    pub failed: Vec<(String, String)>,
}

/// Renders every frame into `dir`, replacing any frames from a previous run.
///
/// A frame that fails is logged and skipped; numbering stays contiguous so
/// the assembler's glob sees no holes.
pub fn render_frames<R: FrameRenderer + ?Sized>(
    renderer: &mut R,
    frames: &[Frame],
    dir: &Path,
) -> Result<RenderReport, RenderError> {
    fs::create_dir_all(dir)?;
    remove_stale_frames(dir)?;

    let mut report = RenderReport::default();
    for (i, frame) in frames.iter().enumerate() {
        let when = frame.timestamp.format("%Y-%m-%d %H:%M").to_string();
        let path = dir.join(frame_file_name(report.written.len()));
        match renderer.render(frame, &path) {
            Ok(()) => {
                logging::info(
                    DataSource::Render,
                    None,
                    &format!(
                        "[{}/{}] ✓ {} ({} sensors, avg AQI {:.1})",
                        i + 1,
                        frames.len(),
                        when,
                        frame.stats.count,
                        frame.stats.mean
                    ),
                );
                report.written.push(path);
            }
            Err(e) => {
                logging::warn(
                    DataSource::Render,
                    None,
                    &format!("[{}/{}] ✗ {}: {}", i + 1, frames.len(), when, e),
                );
                report.failed.push((when, e.to_string()));
            }
        }
    }

    logging::log_fetch_summary(
        DataSource::Render,
        frames.len(),
        report.written.len(),
        report.failed.len(),
    );
    Ok(report)
}

fn remove_stale_frames(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("frame_") && n.ends_with(".png"))
            .unwrap_or(false);
        if is_frame {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FrameStats, Sensor};
    use chrono::TimeZone;

    fn bbox() -> BoundingBox {
        BoundingBox::new(51.3, -117.0, 51.0, -116.0).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 29, hour, 0, 0).unwrap()
    }

    fn frame_with_stats(hour: u32, pm25: f64, stats: FrameStats) -> Frame {
        let sensor = Sensor {
            sensor_index: 1,
            name: None,
            latitude: 51.15,
            longitude: -116.5,
            pm25_current: None,
            last_seen: None,
        };
        Frame {
            timestamp: at(hour),
            points: vec![FramePoint { sensor, aqi: aqi::convert(pm25).unwrap() }],
            stats,
        }
    }

    fn frame(hour: u32, pm25: f64) -> Frame {
        let value = aqi::convert(pm25).unwrap();
        let stats = FrameStats {
            count: 1,
            mean: f64::from(value.aqi),
            min: value.aqi,
            max: value.aqi,
        };
        frame_with_stats(hour, pm25, stats)
    }

    fn count_color(img: &RgbImage, color: [u8; 3]) -> usize {
        img.pixels().filter(|p| p.0 == color).count()
    }

    struct FailingOn(usize, usize);

    impl FrameRenderer for FailingOn {
        fn render(&mut self, _frame: &Frame, path: &Path) -> Result<(), RenderError> {
            self.1 += 1;
            if self.1 - 1 == self.0 {
                return Err(RenderError::Io(std::io::Error::other("disk full")));
            }
            fs::write(path, b"png")?;
            Ok(())
        }
    }

    #[test]
    fn test_frame_file_names_sort_in_playback_order() {
        assert_eq!(frame_file_name(0), "frame_0000.png");
        assert_eq!(frame_file_name(42), "frame_0042.png");
        let mut names: Vec<String> = (0..120).rev().map(frame_file_name).collect();
        names.sort();
        assert_eq!(names[0], "frame_0000.png");
        assert_eq!(names[119], "frame_0119.png");
    }

    #[test]
    fn test_bounds_pad_the_box() {
        let renderer = ScatterRenderer::new(bbox(), 320, 240);
        let (west, east, south, north) = renderer.bounds();
        assert!((west - (-117.02)).abs() < 1e-9);
        assert!((east - (-115.98)).abs() < 1e-9);
        assert!((south - 50.98).abs() < 1e-9);
        assert!((north - 51.32).abs() < 1e-9);
    }

    #[test]
    fn test_caption_has_region_and_time() {
        let renderer = ScatterRenderer::new(bbox(), 320, 240).with_title("Golden, BC");
        assert_eq!(
            renderer.caption(&frame(17, 5.0)),
            "PurpleAir AQI - Golden, BC - 2025-10-29 17:00 UTC"
        );
    }

    #[test]
    fn test_progress_follows_the_run_period() {
        let renderer = ScatterRenderer::new(bbox(), 320, 240);
        assert_eq!(renderer.progress(at(6)), None);

        let renderer = renderer.with_time_range(at(0), at(20));
        assert_eq!(renderer.progress(at(0)), Some(0.0));
        assert_eq!(renderer.progress(at(5)), Some(0.25));
        assert_eq!(renderer.progress(at(23)), Some(1.0));
    }

    #[test]
    fn test_small_sizes_are_raised_to_minimum() {
        let renderer = ScatterRenderer::new(bbox(), 10, 10);
        assert_eq!(renderer.dimensions(), (MIN_WIDTH, MIN_HEIGHT));
    }

    #[test]
    fn test_scatter_renderer_writes_png_with_marker_and_legend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_0000.png");
        let mut renderer = ScatterRenderer::new(bbox(), 640, 480).with_title("Golden, BC");
        renderer.render(&frame(0, 40.0), &path).expect("render should succeed");

        let img = image::open(&path).expect("written file is a PNG").to_rgb8();
        assert_eq!(img.dimensions(), (640, 480));
        // The marker fill dominates its category; every legend swatch is present.
        let marker = AqiCategory::UnhealthyForSensitiveGroups.color();
        assert!(count_color(&img, marker) > 150, "marker disc drawn");
        for category in AqiCategory::ALL {
            assert!(
                count_color(&img, category.color()) >= 50,
                "legend swatch for {} drawn",
                category
            );
        }
    }

    #[test]
    fn test_frames_differing_only_in_time_render_differently() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ScatterRenderer::new(bbox(), 320, 240)
            .with_title("Golden, BC")
            .with_time_range(at(0), at(23));

        let stats = FrameStats { count: 1, mean: 112.0, min: 112, max: 112 };
        let early = dir.path().join("early.png");
        let late = dir.path().join("late.png");
        renderer.render(&frame_with_stats(0, 40.0, stats), &early).unwrap();
        renderer.render(&frame_with_stats(17, 40.0, stats), &late).unwrap();

        assert_ne!(fs::read(&early).unwrap(), fs::read(&late).unwrap());
    }

    #[test]
    fn test_stats_swatch_follows_mean_category() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ScatterRenderer::new(bbox(), 320, 240);
        let hazardous = AqiCategory::Hazardous.color();

        let calm = dir.path().join("calm.png");
        let smoky = dir.path().join("smoky.png");
        let low = FrameStats { count: 1, mean: 10.0, min: 10, max: 10 };
        let high = FrameStats { count: 1, mean: 450.0, min: 450, max: 450 };
        renderer.render(&frame_with_stats(0, 2.0, low), &calm).unwrap();
        renderer.render(&frame_with_stats(0, 2.0, high), &smoky).unwrap();

        let calm = image::open(&calm).unwrap().to_rgb8();
        let smoky = image::open(&smoky).unwrap().to_rgb8();
        assert!(count_color(&smoky, hazardous) > count_color(&calm, hazardous));
    }

    #[test]
    fn test_render_frames_keeps_numbering_contiguous_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0099.png"), b"stale").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let frames = vec![frame(0, 5.0), frame(1, 6.0), frame(2, 7.0)];
        let mut renderer = FailingOn(1, 0);
        let report = render_frames(&mut renderer, &frames, dir.path()).unwrap();

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2025-10-29 01:00");
        assert!(dir.path().join("frame_0000.png").exists());
        assert!(dir.path().join("frame_0001.png").exists());
        assert!(!dir.path().join("frame_0002.png").exists());
        assert!(!dir.path().join("frame_0099.png").exists(), "stale frames are removed");
        assert!(dir.path().join("notes.txt").exists());
    }
}
