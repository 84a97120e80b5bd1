use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::RenderError;

/// Flag spellings understood by the render worker.
///
/// These are an external-tool contract, so they are loaded from configuration
/// rather than matched literally in the resolver or the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagGrammar {
    pub frame: String,
    pub start: String,
    pub end: String,
    pub output: String,
    pub format: String,
    pub animation: String,
}

impl Default for FlagGrammar {
    fn default() -> Self {
        Self {
            frame: "-f".to_string(),
            start: "-s".to_string(),
            end: "-e".to_string(),
            output: "-o".to_string(),
            format: "-F".to_string(),
            animation: "-a".to_string(),
        }
    }
}

/// A launch command split into shell words: the program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    tokens: Vec<String>,
}

impl LaunchCommand {
    pub fn parse(raw: &str) -> Result<Self, RenderError> {
        let tokens = shell_words::split(raw).map_err(|err| RenderError::InvalidCommand {
            message: err.to_string(),
        })?;
        Self::from_tokens(tokens)
    }

    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, RenderError> {
        if tokens.is_empty() {
            return Err(RenderError::InvalidCommand {
                message: "empty launch command".to_string(),
            });
        }
        Ok(Self { tokens })
    }

    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    fn flag_index(&self, flag: &str) -> Option<usize> {
        self.args()
            .iter()
            .rposition(|arg| arg == flag)
            .map(|pos| pos + 1)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flag_index(flag).is_some()
    }

    /// Value following the last occurrence of `flag`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let idx = self.flag_index(flag)?;
        self.tokens.get(idx + 1).map(String::as_str)
    }

    /// Replaces the value following the last occurrence of `flag`.
    /// Returns false when the flag or its value is missing.
    pub fn set_flag_value(&mut self, flag: &str, value: impl Into<String>) -> bool {
        let Some(idx) = self.flag_index(flag) else {
            return false;
        };
        match self.tokens.get_mut(idx + 1) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// The scene file argument, if the command names one.
    pub fn scene_file(&self) -> Option<&str> {
        self.args()
            .iter()
            .find(|arg| arg.to_ascii_lowercase().ends_with(".blend"))
            .map(String::as_str)
    }

    pub fn to_command_string(&self) -> String {
        shell_words::join(&self.tokens)
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRange {
    pub start: i32,
    pub end: i32,
}

impl Default for FrameRange {
    fn default() -> Self {
        Self { start: 1, end: 1 }
    }
}

impl FrameRange {
    pub fn single(frame: i32) -> Self {
        Self {
            start: frame,
            end: frame,
        }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn total_frames(&self) -> u32 {
        (i64::from(self.end) - i64::from(self.start) + 1).max(1) as u32
    }

    /// Computes the range once from the command's frame-selection flags.
    /// A single-frame flag wins over a start/end pair; neither means frame 1.
    pub fn from_command(command: &LaunchCommand, grammar: &FlagGrammar) -> Self {
        if let Some(spec) = command.flag_value(&grammar.frame) {
            if let Some(range) = parse_frame_spec(spec) {
                return range;
            }
        }

        let start = command
            .flag_value(&grammar.start)
            .and_then(|value| value.trim().parse::<i32>().ok());
        let end = command
            .flag_value(&grammar.end)
            .and_then(|value| value.trim().parse::<i32>().ok());

        match (start, end) {
            (None, None) => Self::default(),
            (Some(start), None) => Self::single(start),
            (None, Some(end)) => Self {
                start: 1.min(end),
                end,
            },
            (Some(start), Some(end)) => Self {
                start,
                end: end.max(start),
            },
        }
    }
}

/// Parses `N` or `A..B`. Anything else, comma lists included, is not a
/// contiguous range and yields `None`.
fn parse_frame_spec(spec: &str) -> Option<FrameRange> {
    let item = spec.trim();
    if let Some((start, end)) = item.split_once("..") {
        let start = start.trim().parse::<i32>().ok()?;
        let end = end.trim().parse::<i32>().ok()?;
        return Some(FrameRange {
            start,
            end: end.max(start),
        });
    }
    item.parse::<i32>().ok().map(FrameRange::single)
}
