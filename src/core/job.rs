use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::grammar::FrameRange;
use crate::core::output_path::OutputTarget;
use crate::core::tracker::Telemetry;

/// Identifies a job by the OS process id of its worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn from_pid(pid: u32) -> Self {
        Self(pid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Spawned, no output seen yet.
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub raw_command: String,
    pub effective_command: String,
    pub frame_range: FrameRange,
    pub telemetry: Telemetry,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub output: OutputTarget,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        raw_command: String,
        effective_command: String,
        frame_range: FrameRange,
        output: OutputTarget,
    ) -> Self {
        Self {
            id,
            raw_command,
            effective_command,
            frame_range,
            telemetry: Telemetry::new(frame_range),
            status: JobStatus::Starting,
            start_time: Utc::now(),
            end_time: None,
            output,
            exit_code: None,
            error: None,
        }
    }

    /// Moves the record into a terminal state. Terminal states are final, so a
    /// second call is ignored and returns false.
    pub fn close(&mut self, status: JobStatus, exit_code: Option<i32>, error: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.exit_code = exit_code;
        self.error = error;
        self.end_time = Some(Utc::now());
        true
    }
}
