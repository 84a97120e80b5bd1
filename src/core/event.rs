use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::classify::LineClass;
use crate::core::job::JobId;
use crate::core::tracker::Telemetry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    #[serde(rename = "job-started", rename_all = "camelCase")]
    Started {
        id: JobId,
        command: String,
        start_time: DateTime<Utc>,
    },
    #[serde(rename = "job-progress")]
    Progress {
        id: JobId,
        #[serde(flatten)]
        telemetry: Telemetry,
    },
    #[serde(rename = "job-diagnostic")]
    Diagnostic {
        id: JobId,
        level: LineClass,
        message: String,
    },
    #[serde(rename = "job-completed", rename_all = "camelCase")]
    Completed { id: JobId, exit_code: Option<i32> },
    #[serde(rename = "job-failed")]
    Failed { id: JobId, error: String },
    #[serde(rename = "job-stopped")]
    Stopped { id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Started { id, .. }
            | JobEvent::Progress { id, .. }
            | JobEvent::Diagnostic { id, .. }
            | JobEvent::Completed { id, .. }
            | JobEvent::Failed { id, .. }
            | JobEvent::Stopped { id } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::Stopped { .. }
        )
    }
}

/// Per-call delivery target passed to `Supervisor::start`.
///
/// `deliver` runs while the supervisor serializes event delivery, so an
/// implementation must not call back into the supervisor.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &JobEvent);
}

impl EventSink for Sender<JobEvent> {
    fn deliver(&self, event: &JobEvent) {
        let _ = self.send(event.clone());
    }
}

/// Discards everything; for callers that only listen on the bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _event: &JobEvent) {}
}

pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(&JobEvent) + Send + Sync,
{
    fn deliver(&self, event: &JobEvent) {
        (self.0)(event)
    }
}

/// Fan-out of job events to every subscriber. Subscribers whose receiver was
/// dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<JobEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, event: &JobEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
