use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Substrings that make a line fatal for its job, matched case-insensitively.
pub const CRITICAL_VOCABULARY: [&str; 11] = [
    "no camera in scene",
    "cannot render, no camera",
    "unexpected exit",
    "failed to start",
    "invalid command",
    "segmentation fault",
    "access violation",
    "fatal error",
    "exception",
    "terminated unexpectedly",
    "possible crash",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineClass {
    Critical,
    Error,
    Warning,
    Info,
}

pub fn is_critical_error(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    CRITICAL_VOCABULARY
        .iter()
        .any(|needle| lower.contains(needle))
}

pub fn classify_line(line: &str) -> LineClass {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineClass::Info;
    }

    if is_critical_error(trimmed) {
        return LineClass::Critical;
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("error") {
        return LineClass::Error;
    }
    if lower.contains("warning") {
        return LineClass::Warning;
    }

    LineClass::Info
}

/// Counts non-fatal diagnostics over a rolling window and trips once the
/// window holds more than `limit` of them.
#[derive(Debug, Clone)]
pub struct FloodGuard {
    limit: u32,
    window: Duration,
    seen: VecDeque<Instant>,
}

impl FloodGuard {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            seen: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Records one diagnostic seen at `now`; returns true when the guard trips.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.seen.front() {
            if now.saturating_duration_since(oldest) < self.window {
                break;
            }
            self.seen.pop_front();
        }
        self.seen.push_back(now);
        self.seen.len() > self.limit as usize
    }
}

impl Default for FloodGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_vocabulary_is_case_insensitive() {
        assert!(is_critical_error("Segmentation fault (core dumped)"));
        assert!(is_critical_error("EXCEPTION_ACCESS_VIOLATION at 0x0000"));
        assert!(is_critical_error("Error: Cannot render, no camera"));
        assert!(!is_critical_error("Fra:1 Mem:10M (Peak 12M) | Sample 1/8"));
    }

    #[test]
    fn lines_are_classified_by_severity() {
        assert_eq!(classify_line("Fatal error: out of memory"), LineClass::Critical);
        assert_eq!(
            classify_line("Error: Image 'tex.png' not found"),
            LineClass::Error
        );
        assert_eq!(
            classify_line("Warning: property 'foo' not found"),
            LineClass::Warning
        );
        assert_eq!(classify_line("Saved: '/tmp/out0001.png'"), LineClass::Info);
        assert_eq!(classify_line("Python: Traceback exception"), LineClass::Critical);
        assert_eq!(classify_line("   "), LineClass::Info);
    }

    #[test]
    fn flood_guard_trips_above_limit_within_window() {
        let mut guard = FloodGuard::new(3, Duration::from_secs(1));
        let start = Instant::now();
        assert!(!guard.record(start));
        assert!(!guard.record(start + Duration::from_millis(100)));
        assert!(!guard.record(start + Duration::from_millis(200)));
        assert!(guard.record(start + Duration::from_millis(300)));
    }

    #[test]
    fn flood_guard_counts_bursts_across_a_second_boundary() {
        let mut guard = FloodGuard::new(50, Duration::from_secs(1));
        let start = Instant::now();
        assert!(!guard.record(start));

        let mut tripped = false;
        for i in 0..40u64 {
            tripped |= guard.record(start + Duration::from_millis(900 + i));
        }
        assert!(!tripped);
        for i in 0..40u64 {
            tripped |= guard.record(start + Duration::from_millis(1000 + i));
        }
        assert!(tripped);
    }

    #[test]
    fn flood_guard_forgets_old_diagnostics() {
        let mut guard = FloodGuard::new(2, Duration::from_secs(1));
        let start = Instant::now();
        assert!(!guard.record(start));
        assert!(!guard.record(start + Duration::from_millis(500)));
        assert!(!guard.record(start + Duration::from_millis(1500)));
        assert!(!guard.record(start + Duration::from_millis(1600)));
        assert!(guard.record(start + Duration::from_millis(1700)));
    }
}
