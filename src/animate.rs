//! Animation assembly with external encoders.
//!
//! `ffmpeg` produces both the MP4 and the GIF; ImageMagick `convert` is the
//! GIF fallback. The frames directory is consumed by glob, so playback order
//! is filename order. A tool that is not installed only costs its format.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::logging::{self, DataSource};
use crate::render::FRAME_GLOB;

/// GIF width; height follows the frame aspect ratio.
const GIF_WIDTH: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationFormat {
    Gif,
    Mp4,
}

impl AnimationFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AnimationFormat::Gif => "gif",
            AnimationFormat::Mp4 => "mp4",
        }
    }

    pub fn parse(s: &str) -> Option<AnimationFormat> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gif" => Some(AnimationFormat::Gif),
            "mp4" => Some(AnimationFormat::Mp4),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("{tool} not found: {source}")]
    NotFound {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result for one requested format.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeOutcome {
    Written { path: PathBuf, tool: String },
    /// No tool for this format could be spawned.
    ToolMissing,
    /// The tool ran but exited unsuccessfully. `exit_code` is `None` when it
    /// was killed by a signal or never got as far as running.
    Failed { exit_code: Option<i32>, stderr: String },
}

impl EncodeOutcome {
    /// One-line description of a `Failed` outcome, e.g. `exit code 1: <stderr>`.
    pub fn failure_text(exit_code: Option<i32>, stderr: &str) -> String {
        let code = match exit_code {
            Some(code) => format!("exit code {}", code),
            None => "no exit code".to_string(),
        };
        if stderr.is_empty() { code } else { format!("{}: {}", code, stderr) }
    }
}

/// External tools used for encoding. Program names are configurable so a
/// machine with e.g. `magick` instead of `convert` still works.
#[derive(Debug, Clone)]
pub struct Assembler {
    pub ffmpeg: String,
    pub convert: String,
    pub fps: u32,
}

impl Assembler {
    pub fn new(fps: u32) -> Self {
        Assembler {
            ffmpeg: "ffmpeg".to_string(),
            convert: "convert".to_string(),
            fps: fps.max(1),
        }
    }

    /// Encodes each format, continuing past failures.
    pub fn assemble(
        &self,
        frames_dir: &Path,
        output_stem: &Path,
        formats: &[AnimationFormat],
    ) -> Vec<(AnimationFormat, EncodeOutcome)> {
        formats
            .iter()
            .map(|format| {
                let output = output_stem.with_extension(format.extension());
                let outcome = self.encode(*format, frames_dir, &output);
                match &outcome {
                    EncodeOutcome::Written { path, tool } => logging::info(
                        DataSource::Encoder,
                        None,
                        &format!(
                            "✓ {} written with {}: {}",
                            format.extension(),
                            tool,
                            path.display()
                        ),
                    ),
                    EncodeOutcome::ToolMissing => logging::warn(
                        DataSource::Encoder,
                        None,
                        &format!("no encoder available for {}; skipping", format.extension()),
                    ),
                    EncodeOutcome::Failed { exit_code, stderr } => logging::warn(
                        DataSource::Encoder,
                        None,
                        &format!(
                            "{} encoding failed ({})",
                            format.extension(),
                            EncodeOutcome::failure_text(*exit_code, stderr)
                        ),
                    ),
                }
                (*format, outcome)
            })
            .collect()
    }

    fn encode(&self, format: AnimationFormat, frames_dir: &Path, output: &Path) -> EncodeOutcome {
        let args = match format {
            AnimationFormat::Mp4 => mp4_args(self.fps, frames_dir, output),
            AnimationFormat::Gif => gif_args(self.fps, frames_dir, output),
        };
        let first = run_tool(&self.ffmpeg, &args);

        let result = match (format, first) {
            (AnimationFormat::Gif, Err(EncodeError::NotFound { .. })) => {
                let frames = match sorted_frames(frames_dir) {
                    Ok(frames) => frames,
                    Err(e) => {
                        return EncodeOutcome::Failed { exit_code: None, stderr: e.to_string() };
                    }
                };
                run_tool(&self.convert, &convert_gif_args(self.fps, &frames, output))
                    .map(|()| self.convert.clone())
            }
            (_, other) => other.map(|()| self.ffmpeg.clone()),
        };

        match result {
            Ok(tool) => EncodeOutcome::Written { path: output.to_path_buf(), tool },
            Err(EncodeError::NotFound { .. }) => EncodeOutcome::ToolMissing,
            Err(EncodeError::ExecutionFailed { exit_code, stderr, .. }) => {
                EncodeOutcome::Failed { exit_code, stderr }
            }
            Err(e) => EncodeOutcome::Failed { exit_code: None, stderr: e.to_string() },
        }
    }
}

// ---------------------------------------------------------------------------
// Command lines
// ---------------------------------------------------------------------------

fn glob_input(frames_dir: &Path) -> String {
    frames_dir.join(FRAME_GLOB).to_string_lossy().into_owned()
}

pub fn mp4_args(fps: u32, frames_dir: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(), // OK to overwrite
        "-framerate".to_string(),
        fps.to_string(),
        "-pattern_type".to_string(),
        "glob".to_string(),
        "-i".to_string(),
        glob_input(frames_dir),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        // libx264 needs even dimensions
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

pub fn gif_args(fps: u32, frames_dir: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-framerate".to_string(),
        fps.to_string(),
        "-pattern_type".to_string(),
        "glob".to_string(),
        "-i".to_string(),
        glob_input(frames_dir),
        "-vf".to_string(),
        format!("scale={}:-1", GIF_WIDTH),
        "-loop".to_string(),
        "0".to_string(), // infinite loop
        output.to_string_lossy().into_owned(),
    ]
}

/// ImageMagick takes the delay in hundredths of a second.
pub fn convert_gif_args(fps: u32, frames: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = vec![
        "-delay".to_string(),
        (100 / fps.max(1)).to_string(),
        "-loop".to_string(),
        "0".to_string(),
    ];
    args.extend(frames.iter().map(|p| p.to_string_lossy().into_owned()));
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Frame files in `dir`, in filename order.
pub fn sorted_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("frame_") && n.ends_with(".png"))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

fn run_tool(tool: &str, args: &[String]) -> Result<(), EncodeError> {
    let output = Command::new(tool).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EncodeError::NotFound { tool: tool.to_string(), source: e }
        } else {
            EncodeError::IoError(e)
        }
    })?;

    if !output.status.success() {
        return Err(EncodeError::ExecutionFailed {
            tool: tool.to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mp4_args_use_glob_and_fps() {
        let args = mp4_args(4, Path::new("/tmp/purple-air/frames"), Path::new("/tmp/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.starts_with(
            "-y -framerate 4 -pattern_type glob -i /tmp/purple-air/frames/frame_*.png"
        ));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_gif_args_scale_and_loop() {
        let args = gif_args(6, Path::new("frames"), Path::new("out.gif"));
        assert!(args.contains(&"scale=800:-1".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-loop" && w[1] == "0"));
        assert!(args.windows(2).any(|w| w[0] == "-framerate" && w[1] == "6"));
    }

    #[test]
    fn test_convert_args_keep_frame_order() {
        let frames = vec![PathBuf::from("f/frame_0000.png"), PathBuf::from("f/frame_0001.png")];
        let args = convert_gif_args(4, &frames, Path::new("out.gif"));
        assert_eq!(
            args,
            vec!["-delay", "25", "-loop", "0", "f/frame_0000.png", "f/frame_0001.png", "out.gif"]
        );
    }

    #[test]
    fn test_sorted_frames_orders_by_name_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_0002.png", "frame_0000.png", "frame_0001.png", "readme.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let frames = sorted_frames(dir.path()).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_0000.png", "frame_0001.png", "frame_0002.png"]);
    }

    #[test]
    fn test_missing_tools_degrade_to_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0000.png"), b"").unwrap();
        let assembler = Assembler {
            ffmpeg: "purpleair-test-no-such-ffmpeg".to_string(),
            convert: "purpleair-test-no-such-convert".to_string(),
            fps: 4,
        };
        let outcomes = assembler.assemble(
            dir.path(),
            &dir.path().join("aqi_animation"),
            &[AnimationFormat::Gif, AnimationFormat::Mp4],
        );
        assert_eq!(
            outcomes,
            vec![
                (AnimationFormat::Gif, EncodeOutcome::ToolMissing),
                (AnimationFormat::Mp4, EncodeOutcome::ToolMissing),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_gif_falls_back_to_convert_when_ffmpeg_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0000.png"), b"").unwrap();
        // `true` accepts any arguments and exits 0
        let assembler = Assembler {
            ffmpeg: "purpleair-test-no-such-ffmpeg".to_string(),
            convert: "true".to_string(),
            fps: 4,
        };
        let stem = dir.path().join("aqi_animation");
        let outcomes = assembler.assemble(
            dir.path(),
            &stem,
            &[AnimationFormat::Gif, AnimationFormat::Mp4],
        );
        assert_eq!(
            outcomes,
            vec![
                (
                    AnimationFormat::Gif,
                    EncodeOutcome::Written {
                        path: stem.with_extension("gif"),
                        tool: "true".to_string(),
                    }
                ),
                (AnimationFormat::Mp4, EncodeOutcome::ToolMissing),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failed_with_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0000.png"), b"").unwrap();
        let assembler = Assembler {
            ffmpeg: "false".to_string(),
            convert: "purpleair-test-no-such-convert".to_string(),
            fps: 4,
        };
        let outcomes = assembler.assemble(
            dir.path(),
            &dir.path().join("aqi_animation"),
            &[AnimationFormat::Mp4, AnimationFormat::Gif],
        );
        // A GIF attempt that ran and failed does not fall back to convert
        for (_, outcome) in &outcomes {
            assert!(
                matches!(outcome, EncodeOutcome::Failed { exit_code: Some(1), .. }),
                "got {:?}",
                outcome
            );
        }
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn test_failure_text() {
        assert_eq!(EncodeOutcome::failure_text(Some(1), ""), "exit code 1");
        assert_eq!(
            EncodeOutcome::failure_text(Some(187), "Unknown encoder 'libx264'"),
            "exit code 187: Unknown encoder 'libx264'"
        );
        assert_eq!(EncodeOutcome::failure_text(None, "killed"), "no exit code: killed");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(AnimationFormat::parse("GIF"), Some(AnimationFormat::Gif));
        assert_eq!(AnimationFormat::parse("mp4"), Some(AnimationFormat::Mp4));
        assert_eq!(AnimationFormat::parse("webm"), None);
    }
}
