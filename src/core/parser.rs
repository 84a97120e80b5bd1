//! Decodes render-worker output lines into structured facts.
//!
//! Two dialects are understood. The legacy one prints pipe-separated status lines
//! (`Fra:12 Mem:310.5M (Peak 402.1M) | ... | Sample 64/128`); the newer one reports
//! `Rendered 4/16 Tiles, Sample 32/128`, `Remaining:` estimates and signals frame
//! completion through `Append frame N` and `Time: ... (Saving: ...)` lines.
//!
//! Matching is driven by a table of [`PatternRule`]s so a new dialect only needs
//! new rules.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

#[derive(Debug, Clone, PartialEq)]
pub enum LegacyFact {
    Frame(i32),
    Memory { current_mb: f64, peak_mb: f64 },
    Sample { current: u32, total: u32 },
    Compositing(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TiledFact {
    Remaining(String),
    Tiles {
        current: u32,
        total: u32,
        sample: u32,
        total_samples: u32,
    },
    /// A frame was appended to a video container.
    VideoAppend(i32),
    /// The frame just finished and its image was written.
    FrameSaved,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Legacy(LegacyFact),
    Tiled(TiledFact),
    /// The worker announced its own clean shutdown.
    Quit,
}

pub type FactBuilder = fn(&Captures<'_>) -> Option<Fact>;

#[derive(Clone)]
pub struct PatternRule {
    pub name: &'static str,
    pub regex: Regex,
    pub build: FactBuilder,
}

impl std::fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRule")
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

impl PatternRule {
    /// Panics on an invalid pattern; rules are expected to be static.
    pub fn new(name: &'static str, pattern: &str, build: FactBuilder) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid pattern rule"),
            build,
        }
    }
}

fn capture<T: std::str::FromStr>(caps: &Captures<'_>, idx: usize) -> Option<T> {
    caps.get(idx)?.as_str().trim().parse::<T>().ok()
}

/// Memory values are reported in megabytes unless tagged `G`.
fn to_megabytes(value: f64, unit: &str) -> f64 {
    if unit.eq_ignore_ascii_case("G") {
        value * 1024.0
    } else {
        value
    }
}

fn build_frame(caps: &Captures<'_>) -> Option<Fact> {
    Some(Fact::Legacy(LegacyFact::Frame(capture(caps, 1)?)))
}

fn build_memory(caps: &Captures<'_>) -> Option<Fact> {
    let current: f64 = capture(caps, 1)?;
    let peak: f64 = capture(caps, 3)?;
    Some(Fact::Legacy(LegacyFact::Memory {
        current_mb: to_megabytes(current, caps.get(2)?.as_str()),
        peak_mb: to_megabytes(peak, caps.get(4)?.as_str()),
    }))
}

fn build_sample(caps: &Captures<'_>) -> Option<Fact> {
    Some(Fact::Legacy(LegacyFact::Sample {
        current: capture(caps, 1)?,
        total: capture(caps, 2)?,
    }))
}

fn build_compositing(caps: &Captures<'_>) -> Option<Fact> {
    let operation = caps.get(1)?.as_str().trim();
    Some(Fact::Legacy(LegacyFact::Compositing(operation.to_string())))
}

fn build_remaining(caps: &Captures<'_>) -> Option<Fact> {
    let remaining = caps.get(1)?.as_str().trim();
    Some(Fact::Tiled(TiledFact::Remaining(remaining.to_string())))
}

fn build_tiles(caps: &Captures<'_>) -> Option<Fact> {
    Some(Fact::Tiled(TiledFact::Tiles {
        current: capture(caps, 1)?,
        total: capture(caps, 2)?,
        sample: capture(caps, 3)?,
        total_samples: capture(caps, 4)?,
    }))
}

fn build_video_append(caps: &Captures<'_>) -> Option<Fact> {
    Some(Fact::Tiled(TiledFact::VideoAppend(capture(caps, 1)?)))
}

fn build_frame_saved(_: &Captures<'_>) -> Option<Fact> {
    Some(Fact::Tiled(TiledFact::FrameSaved))
}

fn build_quit(_: &Captures<'_>) -> Option<Fact> {
    Some(Fact::Quit)
}

static BUILTIN_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule::new("frame", r"\bFra:\s*(-?\d+)", build_frame),
        PatternRule::new(
            "memory",
            r"\bMem:\s*([0-9]*\.?[0-9]+)\s*([MG])\s*\(Peak\s*([0-9]*\.?[0-9]+)\s*([MG])\)",
            build_memory,
        ),
        PatternRule::new("sample", r"(?:^|\|)\s*Sample\s+(\d+)/(\d+)", build_sample),
        PatternRule::new("compositing", r"\bCompositing\s*\|\s*(.+?)\s*$", build_compositing),
        PatternRule::new("remaining", r"\bRemaining:\s*([0-9:.]+)", build_remaining),
        PatternRule::new(
            "tiles",
            r"\bRendered\s+(\d+)/(\d+)\s+Tiles,\s*Sample\s+(\d+)/(\d+)",
            build_tiles,
        ),
        PatternRule::new("video_append", r"(?i)\bappend\s+frame\s+(-?\d+)", build_video_append),
        PatternRule::new(
            "frame_saved",
            r"\bTime:\s*[0-9:.]+\s*\(Saving:\s*[0-9:.]+\)",
            build_frame_saved,
        ),
        PatternRule::new("quit", r"(?i)^\s*blender quit\s*$", build_quit),
    ]
});

#[derive(Debug, Clone)]
pub struct OutputParser {
    rules: Vec<PatternRule>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self {
            rules: BUILTIN_RULES.clone(),
        }
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends extra rules after the built-in table.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = PatternRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Every rule gets one chance per line; facts come back in table order.
    pub fn parse_line(&self, line: &str) -> Vec<Fact> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        self.rules
            .iter()
            .filter_map(|rule| {
                let caps = rule.regex.captures(trimmed)?;
                (rule.build)(&caps)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Vec<Fact> {
        OutputParser::default().parse_line(line)
    }

    #[test]
    fn legacy_status_line() {
        let facts = parse(
            "Fra:12 Mem:310.50M (Peak 402.10M) | Time:00:04.20 | Mem:0.00M, Peak:0.00M | Scene, ViewLayer | Sample 64/128",
        );
        assert_eq!(
            facts,
            vec![
                Fact::Legacy(LegacyFact::Frame(12)),
                Fact::Legacy(LegacyFact::Memory {
                    current_mb: 310.5,
                    peak_mb: 402.1,
                }),
                Fact::Legacy(LegacyFact::Sample {
                    current: 64,
                    total: 128,
                }),
            ]
        );
    }

    #[test]
    fn gigabyte_memory_is_normalised() {
        let facts = parse("Fra:1 Mem:1.5G (Peak 2G)");
        assert!(facts.contains(&Fact::Legacy(LegacyFact::Memory {
            current_mb: 1536.0,
            peak_mb: 2048.0,
        })));
    }

    #[test]
    fn compositing_phase() {
        let facts = parse("Fra:3 Mem:20.00M (Peak 22.00M) | Time:00:01.00 | Compositing | Tile 2-4");
        assert!(facts.contains(&Fact::Legacy(LegacyFact::Compositing("Tile 2-4".to_string()))));
    }

    #[test]
    fn tiled_dialect_lines() {
        let facts = parse("Remaining: 00:12.34 | Rendered 4/16 Tiles, Sample 32/128");
        assert_eq!(
            facts,
            vec![
                Fact::Tiled(TiledFact::Remaining("00:12.34".to_string())),
                Fact::Tiled(TiledFact::Tiles {
                    current: 4,
                    total: 16,
                    sample: 32,
                    total_samples: 128,
                }),
            ]
        );
    }

    #[test]
    fn frame_completion_markers() {
        assert_eq!(parse("Append frame 7"), vec![Fact::Tiled(TiledFact::VideoAppend(7))]);
        assert_eq!(
            parse("Video append frame 8"),
            vec![Fact::Tiled(TiledFact::VideoAppend(8))]
        );
        assert_eq!(
            parse(" Time: 00:03.52 (Saving: 00:00.11)"),
            vec![Fact::Tiled(TiledFact::FrameSaved)]
        );
    }

    #[test]
    fn quit_marker_and_noise() {
        assert_eq!(parse("Blender quit"), vec![Fact::Quit]);
        assert!(parse("Read blend: /tmp/scene.blend").is_empty());
        assert!(parse("").is_empty());
    }

    #[test]
    fn extra_rules_extend_the_table() {
        fn build(caps: &Captures<'_>) -> Option<Fact> {
            Some(Fact::Legacy(LegacyFact::Frame(capture(caps, 1)?)))
        }
        let parser = OutputParser::default().with_rules([PatternRule::new(
            "custom_frame",
            r"^Frame\s+(\d+)\s+started",
            build,
        )]);
        assert_eq!(
            parser.parse_line("Frame 42 started"),
            vec![Fact::Legacy(LegacyFact::Frame(42))]
        );
        assert_eq!(parser.rules().len(), BUILTIN_RULES.len() + 1);
    }
}
