use serde::Serialize;

use crate::core::grammar::FrameRange;
use crate::core::parser::{Fact, LegacyFact, TiledFact};

/// Telemetry accumulated for one job. Optional fields stay `None` until the
/// corresponding pattern has been seen at least once.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub progress: f64,
    pub current_frame: Option<i32>,
    pub completed_frames: u32,
    pub total_frames: u32,
    pub current_sample: Option<u32>,
    pub total_samples: Option<u32>,
    pub current_tile: Option<u32>,
    pub total_tiles: Option<u32>,
    pub memory_usage_mb: Option<f64>,
    pub peak_memory_mb: Option<f64>,
    pub in_compositing: bool,
    pub compositing_operation: Option<String>,
    pub remaining_time: Option<String>,
}

impl Telemetry {
    pub fn new(range: FrameRange) -> Self {
        Self {
            total_frames: range.total_frames(),
            ..Self::default()
        }
    }
}

/// Folds parsed facts into a job's [`Telemetry`] and derives its progress.
///
/// Single-frame jobs report 0% until their frame marker shows up and 100%
/// afterwards. Animations report `(completed + sample fraction) / total`.
/// A frame boundary can be announced by both an append marker and a saving
/// marker, so the first one to arrive counts it and `frame_counted` blocks the
/// second until the next frame starts (a new `Fra:` number or `Sample 0/..`).
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    range: FrameRange,
    frame_seen: bool,
    frame_counted: bool,
    counted_frame: Option<i32>,
    sample_fraction: f64,
}

impl ProgressTracker {
    pub fn new(range: FrameRange) -> Self {
        Self {
            range,
            frame_seen: false,
            frame_counted: false,
            counted_frame: None,
            sample_fraction: 0.0,
        }
    }

    /// Returns true when any telemetry field changed.
    pub fn apply(&mut self, telemetry: &mut Telemetry, fact: &Fact) -> bool {
        let before = telemetry.clone();

        match fact {
            Fact::Legacy(LegacyFact::Frame(frame)) => self.enter_frame(telemetry, *frame),
            Fact::Legacy(LegacyFact::Memory {
                current_mb,
                peak_mb,
            }) => {
                telemetry.memory_usage_mb = Some(*current_mb);
                let peak = telemetry.peak_memory_mb.unwrap_or(0.0).max(*peak_mb);
                telemetry.peak_memory_mb = Some(peak);
            }
            Fact::Legacy(LegacyFact::Sample { current, total }) => {
                self.observe_sample(telemetry, *current, *total);
            }
            Fact::Legacy(LegacyFact::Compositing(operation)) => {
                telemetry.in_compositing = true;
                telemetry.compositing_operation = Some(operation.clone());
            }
            Fact::Tiled(TiledFact::Remaining(remaining)) => {
                telemetry.remaining_time = Some(remaining.clone());
            }
            Fact::Tiled(TiledFact::Tiles {
                current,
                total,
                sample,
                total_samples,
            }) => {
                telemetry.current_tile = Some(*current);
                telemetry.total_tiles = Some(*total);
                self.observe_sample(telemetry, *sample, *total_samples);
            }
            Fact::Tiled(TiledFact::VideoAppend(frame)) => {
                self.complete_frame(telemetry, Some(*frame));
            }
            Fact::Tiled(TiledFact::FrameSaved) => self.complete_frame(telemetry, None),
            Fact::Quit => {}
        }

        self.recompute(telemetry);
        *telemetry != before
    }

    /// Marks every frame as done; used on clean completion.
    pub fn finish(&mut self, telemetry: &mut Telemetry) {
        self.frame_seen = true;
        telemetry.completed_frames = self.range.total_frames();
        telemetry.in_compositing = false;
        telemetry.progress = 100.0;
    }

    fn enter_frame(&mut self, telemetry: &mut Telemetry, frame: i32) {
        if self.frame_counted && self.counted_frame != Some(frame) {
            self.frame_counted = false;
        }
        if telemetry.current_frame != Some(frame) {
            self.sample_fraction = 0.0;
            telemetry.in_compositing = false;
            telemetry.compositing_operation = None;
        }
        self.frame_seen = true;
        telemetry.current_frame = Some(frame);

        if !self.range.is_single() {
            let done_before = i64::from(frame) - i64::from(self.range.start);
            let done_before = done_before.clamp(0, i64::from(self.range.total_frames())) as u32;
            telemetry.completed_frames = telemetry.completed_frames.max(done_before);
        }
    }

    fn observe_sample(&mut self, telemetry: &mut Telemetry, current: u32, total: u32) {
        if current == 0 {
            self.frame_counted = false;
        }
        telemetry.current_sample = Some(current);
        telemetry.total_samples = Some(total);
        self.sample_fraction = if total > 0 {
            (f64::from(current) / f64::from(total)).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    fn complete_frame(&mut self, telemetry: &mut Telemetry, appended: Option<i32>) {
        self.frame_seen = true;
        let finished = appended.or(telemetry.current_frame);
        if self.frame_counted {
            // Only a different, known frame number starts a new boundary.
            let new_boundary = matches!(
                (self.counted_frame, appended),
                (Some(counted), Some(frame)) if frame != counted
            );
            if !new_boundary {
                if self.counted_frame.is_none() {
                    self.counted_frame = appended;
                }
                return;
            }
        }
        self.frame_counted = true;
        self.counted_frame = finished;
        self.sample_fraction = 0.0;
        telemetry.in_compositing = false;

        let total = self.range.total_frames();
        telemetry.completed_frames = (telemetry.completed_frames + 1).min(total);

        if let Some(frame) = finished {
            if frame < self.range.end {
                telemetry.current_frame = Some(frame + 1);
            }
        }
    }

    fn recompute(&self, telemetry: &mut Telemetry) {
        telemetry.progress = if self.range.is_single() {
            if self.frame_seen {
                100.0
            } else {
                0.0
            }
        } else {
            let total = f64::from(self.range.total_frames());
            let done = f64::from(telemetry.completed_frames);
            let partial = if telemetry.completed_frames < self.range.total_frames() {
                self.sample_fraction
            } else {
                0.0
            };
            ((done + partial) / total * 100.0).clamp(0.0, 100.0)
        };
    }
}
