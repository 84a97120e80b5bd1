//! Predicts the artifact a render will write and steers the launch command away
//! from files that already exist.
//!
//! The check runs once per job and only protects the first frame's name. It is a
//! presence check, not a lock: two jobs launched back to back can still pick the
//! same path if neither has written anything yet.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::error::RenderError;
use crate::core::grammar::{FlagGrammar, FrameRange, LaunchCommand};

const DEFAULT_FORMAT: &str = "PNG";
const FRAME_PADDING: usize = 4;
const RELATIVE_PREFIX: &str = "//";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTarget {
    /// Predicted path of the first frame (or of the whole file for video).
    pub output_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub is_video: bool,
    pub is_animation: bool,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub command: LaunchCommand,
    pub target: OutputTarget,
    pub renamed: bool,
}

/// Returns the file extension for a worker output format and whether the format
/// produces a video container.
pub fn format_extension(format: &str) -> (String, bool) {
    let upper = format.trim().to_ascii_uppercase();
    let ext = match upper.as_str() {
        "FFMPEG" | "AVIJPEG" | "AVIRAW" | "AVI_JPEG" | "AVI_RAW" | "H264" | "XVID"
        | "THEORA" | "QUICKTIME" => return ("avi".to_string(), true),
        "JPEG" => "jpg",
        "OPEN_EXR" | "OPEN_EXR_MULTILAYER" => "exr",
        "TIFF" => "tif",
        "TARGA" | "TARGA_RAW" => "tga",
        "JPEG2000" => "jp2",
        "IRIS" => "rgb",
        "CINEON" => "cin",
        other => return (other.to_ascii_lowercase(), false),
    };
    (ext.to_string(), false)
}

/// Finds the last run of `#` placeholders, returning its byte range.
fn last_hash_run(pattern: &str) -> Option<(usize, usize)> {
    let end = pattern.rfind('#')? + 1;
    let start = pattern[..end]
        .rfind(|ch: char| ch != '#')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    Some((start, end))
}

fn pad(frame: i32, width: usize) -> String {
    format!("{frame:0width$}")
}

/// Applies the worker's naming rules to an output pattern.
pub fn predict_frame_path(
    pattern: &str,
    frame: i32,
    range: FrameRange,
    format: &str,
    scene_dir: Option<&Path>,
) -> PathBuf {
    let (ext, is_video) = format_extension(format);

    let mut name = match last_hash_run(pattern) {
        Some((start, end)) => {
            let width = end - start;
            let stamp = if is_video {
                format!("{}-{}", pad(range.start, width), pad(range.end, width))
            } else {
                pad(frame, width)
            };
            format!("{}{}{}", &pattern[..start], stamp, &pattern[end..])
        }
        None if is_video => format!(
            "{pattern}{}-{}",
            pad(range.start, FRAME_PADDING),
            pad(range.end, FRAME_PADDING)
        ),
        None => format!("{pattern}{}", pad(frame, FRAME_PADDING)),
    };

    let suffix = format!(".{ext}");
    if !name.to_ascii_lowercase().ends_with(&suffix) {
        name.push_str(&suffix);
    }

    match name.strip_prefix(RELATIVE_PREFIX) {
        Some(rest) => scene_dir.unwrap_or_else(|| Path::new(".")).join(rest),
        None => PathBuf::from(name),
    }
}

/// Appends `_N` to a pattern, keeping a trailing extension for `ext` last.
fn with_suffix(pattern: &str, suffix: u32, ext: &str) -> String {
    let dotted = format!(".{ext}");
    let stem_len = pattern.len().saturating_sub(dotted.len());
    let has_ext = stem_len > 0
        && pattern.is_char_boundary(stem_len)
        && pattern[stem_len..].eq_ignore_ascii_case(&dotted);
    if has_ext {
        format!("{}_{suffix}{}", &pattern[..stem_len], &pattern[stem_len..])
    } else {
        format!("{pattern}_{suffix}")
    }
}

fn scene_dir(command: &LaunchCommand) -> Option<PathBuf> {
    command
        .scene_file()
        .and_then(|scene| Path::new(scene).parent())
        .map(Path::to_path_buf)
}

/// Resolves against the real filesystem.
pub fn resolve(
    command: LaunchCommand,
    grammar: &FlagGrammar,
    max_suffix: u32,
) -> Result<Resolution, RenderError> {
    resolve_with(command, grammar, max_suffix, |path| path.exists())
}

pub fn resolve_with(
    mut command: LaunchCommand,
    grammar: &FlagGrammar,
    max_suffix: u32,
    exists: impl Fn(&Path) -> bool,
) -> Result<Resolution, RenderError> {
    let range = FrameRange::from_command(&command, grammar);
    let format = command
        .flag_value(&grammar.format)
        .unwrap_or(DEFAULT_FORMAT)
        .to_string();
    let (ext, is_video) = format_extension(&format);
    let is_animation = command.has_flag(&grammar.animation) || !range.is_single();

    let Some(raw_pattern) = command.flag_value(&grammar.output).map(str::to_string) else {
        return Ok(Resolution {
            command,
            target: OutputTarget {
                output_file: None,
                output_dir: None,
                is_video,
                is_animation,
            },
            renamed: false,
        });
    };

    let scene_dir = scene_dir(&command);
    let predict =
        |pattern: &str| predict_frame_path(pattern, range.start, range, &format, scene_dir.as_deref());

    let mut predicted = predict(&raw_pattern);
    let mut renamed = false;

    if exists(&predicted) {
        let mut free = None;
        for suffix in 1..=max_suffix {
            let candidate = with_suffix(&raw_pattern, suffix, &ext);
            let path = predict(&candidate);
            if !exists(&path) {
                free = Some((candidate, path));
                break;
            }
        }
        let Some((candidate, path)) = free else {
            return Err(RenderError::OutputPathExhausted { path: predicted });
        };
        tracing::info!(
            from = %predicted.display(),
            to = %path.display(),
            "output path already exists, renaming"
        );
        command.set_flag_value(&grammar.output, candidate);
        predicted = path;
        renamed = true;
    }

    let output_dir = predicted.parent().map(Path::to_path_buf);
    Ok(Resolution {
        command,
        target: OutputTarget {
            output_file: Some(predicted),
            output_dir,
            is_video,
            is_animation,
        },
        renamed,
    })
}
