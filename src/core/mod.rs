pub mod classify;
pub mod error;
pub mod event;
pub mod formatter;
pub mod grammar;
pub mod job;
pub mod jobfile;
pub mod output_path;
pub mod parser;
pub mod supervisor;
mod terminate;
pub mod tracker;
pub mod version;

pub use error::RenderError;
pub use event::{EventBus, EventSink, JobEvent};
pub use job::{JobId, JobRecord, JobStatus};
pub use supervisor::{Supervisor, SupervisorSettings};
