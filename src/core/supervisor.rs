use std::collections::{HashMap, VecDeque};
use std::io::{self, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::core::classify::{classify_line, FloodGuard, LineClass};
use crate::core::error::RenderError;
use crate::core::event::{EventBus, EventSink, JobEvent};
use crate::core::grammar::{FlagGrammar, FrameRange, LaunchCommand};
use crate::core::job::{JobId, JobRecord, JobStatus};
use crate::core::output_path;
use crate::core::parser::{Fact, OutputParser};
use crate::core::terminate::{request_termination, SharedChild};
use crate::core::tracker::ProgressTracker;
use crate::core::version;

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    pub grammar: FlagGrammar,
    pub version_flag: String,
    /// Time between the graceful and the forceful kill on Unix.
    pub stop_grace: Duration,
    pub flood_limit: u32,
    pub flood_window: Duration,
    pub poll_interval: Duration,
    /// How many finished job records `last_outputs` keeps.
    pub history_size: usize,
    pub max_suffix: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grammar: FlagGrammar::default(),
            version_flag: "--version".to_string(),
            stop_grace: Duration::from_secs(2),
            flood_limit: FloodGuard::DEFAULT_LIMIT,
            flood_window: FloodGuard::DEFAULT_WINDOW,
            poll_interval: Duration::from_millis(100),
            history_size: 32,
            max_suffix: 9999,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

enum Verdict {
    Complete,
    Fail(String),
}

struct JobEntry {
    /// Distinguishes successive processes that happen to reuse a pid.
    token: u64,
    record: JobRecord,
    tracker: ProgressTracker,
    flood: FloodGuard,
    child: SharedChild,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
struct SupervisorState {
    jobs: HashMap<JobId, JobEntry>,
    /// Jobs whose termination was requested by a caller, keyed to the token of
    /// the process being stopped. Consumed by the exit observation.
    manually_stopped: HashMap<JobId, u64>,
    last_outputs: VecDeque<JobRecord>,
}

impl SupervisorState {
    fn retire(
        &mut self,
        id: &JobId,
        status: JobStatus,
        exit_code: Option<i32>,
        error: Option<String>,
        history_size: usize,
    ) -> Option<JobEntry> {
        let mut entry = self.jobs.remove(id)?;
        entry.record.close(status, exit_code, error);
        self.last_outputs.push_back(entry.record.clone());
        while self.last_outputs.len() > history_size {
            self.last_outputs.pop_front();
        }
        Some(entry)
    }
}

struct Shared {
    settings: SupervisorSettings,
    parser: OutputParser,
    bus: EventBus,
    state: Mutex<SupervisorState>,
    /// Held while a batch of events is delivered. Always taken after `state`,
    /// before the state guard is released, so no job event can be delivered
    /// after the event that retired the job.
    emit_lock: Mutex<()>,
    next_token: AtomicU64,
}

/// Launches render workers and tracks them until they reach a terminal state.
///
/// Cloning is cheap and every clone drives the same job table.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self::with_parser(settings, OutputParser::default())
    }

    pub fn with_parser(settings: SupervisorSettings, parser: OutputParser) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                parser,
                bus: EventBus::new(),
                state: Mutex::new(SupervisorState::default()),
                emit_lock: Mutex::new(()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        self.shared.bus.subscribe()
    }

    /// Spawns a worker for `command` and returns its id without waiting for output.
    ///
    /// The output path is checked for collisions first and the job is registered
    /// before its streams are read, so the started and initial 0% progress events
    /// always precede any telemetry.
    pub fn start(&self, command: &str, sink: Arc<dyn EventSink>) -> Result<JobId, RenderError> {
        let settings = &self.shared.settings;
        let raw = LaunchCommand::parse(command)?;
        let resolution = output_path::resolve(raw, &settings.grammar, settings.max_suffix)?;
        let effective = resolution.command;
        let range = FrameRange::from_command(&effective, &settings.grammar);

        let mut child = Command::new(effective.program())
            .args(effective.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RenderError::from_spawn(effective.program(), err))?;

        let id = JobId::from_pid(child.id());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let child: SharedChild = Arc::new(Mutex::new(child));
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);

        let record = JobRecord::new(
            id.clone(),
            command.trim().to_string(),
            effective.to_command_string(),
            range,
            resolution.target,
        );
        let opening = vec![
            JobEvent::Started {
                id: id.clone(),
                command: record.effective_command.clone(),
                start_time: record.start_time,
            },
            JobEvent::Progress {
                id: id.clone(),
                telemetry: record.telemetry.clone(),
            },
        ];

        let entry = JobEntry {
            token,
            record,
            tracker: ProgressTracker::new(range),
            flood: FloodGuard::new(settings.flood_limit, settings.flood_window),
            child: Arc::clone(&child),
            sink: Arc::clone(&sink),
        };

        let emitting = {
            let mut state = self.shared.lock_state();
            if let Some(stale) = state.jobs.insert(id.clone(), entry) {
                warn!(job_id = %id, stale_token = stale.token, "replaced stale job entry");
            }
            self.shared.lock_emit()
        };

        info!(
            job_id = %id,
            command = %effective,
            renamed = resolution.renamed,
            frames = range.total_frames(),
            "render job started"
        );
        self.shared.emit(sink.as_ref(), opening);
        drop(emitting);

        let (line_tx, line_rx) = mpsc::channel::<(StreamKind, String)>();
        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(spawn_line_reader(StreamKind::Stdout, stdout, line_tx.clone()));
        }
        if let Some(stderr) = stderr {
            readers.push(spawn_line_reader(StreamKind::Stderr, stderr, line_tx.clone()));
        }
        drop(line_tx);

        let shared = Arc::clone(&self.shared);
        let job_id = id.clone();
        thread::spawn(move || shared.pump(job_id, token, line_rx, readers, child));

        Ok(id)
    }

    /// Requests termination of one job. The job leaves the active table at once
    /// and a stopped event is emitted; the return value reports whether the
    /// termination request was issued, not whether the worker has exited.
    pub fn stop(&self, id: &JobId) -> bool {
        let history = self.shared.settings.history_size;
        let mut state = self.shared.lock_state();
        let Some(token) = state.jobs.get(id).map(|entry| entry.token) else {
            debug!(job_id = %id, "stop requested for unknown job");
            return false;
        };
        state.manually_stopped.insert(id.clone(), token);
        let Some(entry) = state.retire(id, JobStatus::Stopped, None, None, history) else {
            return false;
        };
        let emitting = self.shared.lock_emit();
        drop(state);

        self.shared
            .emit(entry.sink.as_ref(), vec![JobEvent::Stopped { id: id.clone() }]);
        drop(emitting);

        let sent = request_termination(&entry.child, self.shared.settings.stop_grace);
        info!(job_id = %id, sent, "render job stopped");
        sent
    }

    /// Stops every active job and clears the table without waiting for exits.
    pub fn stop_all(&self) {
        let history = self.shared.settings.history_size;
        let mut state = self.shared.lock_state();
        let active: Vec<(JobId, u64)> = state
            .jobs
            .iter()
            .map(|(id, entry)| (id.clone(), entry.token))
            .collect();
        let mut retired = Vec::with_capacity(active.len());
        for (id, token) in active {
            state.manually_stopped.insert(id.clone(), token);
            if let Some(entry) = state.retire(&id, JobStatus::Stopped, None, None, history) {
                retired.push((id, entry));
            }
        }
        let emitting = self.shared.lock_emit();
        drop(state);

        if !retired.is_empty() {
            info!(count = retired.len(), "stopping all render jobs");
        }
        for (id, entry) in &retired {
            self.shared
                .emit(entry.sink.as_ref(), vec![JobEvent::Stopped { id: id.clone() }]);
        }
        drop(emitting);

        for (id, entry) in retired {
            if !request_termination(&entry.child, self.shared.settings.stop_grace) {
                warn!(job_id = %id, "termination request failed");
            }
        }
    }

    pub fn has_active_jobs(&self) -> bool {
        !self.shared.lock_state().jobs.is_empty()
    }

    pub fn list_active_job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.shared.lock_state().jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self, id: &JobId) -> Option<JobRecord> {
        self.shared
            .lock_state()
            .jobs
            .get(id)
            .map(|entry| entry.record.clone())
    }

    /// Records of recently finished jobs, oldest first.
    pub fn last_outputs(&self) -> Vec<JobRecord> {
        self.shared
            .lock_state()
            .last_outputs
            .iter()
            .cloned()
            .collect()
    }

    /// True while a stopped job's worker has not been observed exiting.
    pub fn is_stop_pending(&self, id: &JobId) -> bool {
        self.shared.lock_state().manually_stopped.contains_key(id)
    }

    pub fn get_version(&self, executable: &str) -> String {
        version::get_version(executable, &self.shared.settings.version_flag)
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_emit(&self) -> MutexGuard<'_, ()> {
        self.emit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, sink: &dyn EventSink, events: Vec<JobEvent>) {
        for event in events {
            sink.deliver(&event);
            self.bus.publish(&event);
        }
    }

    /// Drives one job: every output line in arrival order, then the exit.
    fn pump(
        self: Arc<Self>,
        id: JobId,
        token: u64,
        lines: Receiver<(StreamKind, String)>,
        readers: Vec<thread::JoinHandle<()>>,
        child: SharedChild,
    ) {
        for (stream, line) in lines {
            self.handle_line(&id, token, stream, &line);
        }
        for reader in readers {
            let _ = reader.join();
        }
        let status = self.wait_for_exit(&child);
        self.handle_exit(&id, token, status);
    }

    fn wait_for_exit(&self, child: &SharedChild) -> io::Result<ExitStatus> {
        loop {
            let polled = child
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_wait();
            match polled {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    trace!("worker still running after streams closed");
                    thread::sleep(self.settings.poll_interval);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn handle_line(&self, id: &JobId, token: u64, stream: StreamKind, line: &str) {
        debug!(job_id = %id, ?stream, line, "worker output");
        let class = classify_line(line);
        let facts = self.parser.parse_line(line);
        let message = line.trim().to_string();

        let mut state = self.lock_state();
        let Some(entry) = state
            .jobs
            .get_mut(id)
            .filter(|entry| entry.token == token)
        else {
            return;
        };
        let sink = Arc::clone(&entry.sink);
        if entry.record.status == JobStatus::Starting {
            entry.record.status = JobStatus::Running;
        }

        let mut events = Vec::new();
        let mut verdict = None;
        match class {
            LineClass::Critical => verdict = Some(Verdict::Fail(message)),
            LineClass::Error | LineClass::Warning => {
                events.push(JobEvent::Diagnostic {
                    id: id.clone(),
                    level: class,
                    message,
                });
                if entry.flood.record(Instant::now()) {
                    verdict = Some(Verdict::Fail(format!(
                        "worker flooded output with more than {} diagnostics in {:?}",
                        entry.flood.limit(),
                        self.settings.flood_window
                    )));
                }
            }
            LineClass::Info => {}
        }

        if verdict.is_none() {
            let mut changed = false;
            for fact in &facts {
                if matches!(fact, Fact::Quit) {
                    verdict = Some(Verdict::Complete);
                    break;
                }
                changed |= entry.tracker.apply(&mut entry.record.telemetry, fact);
            }
            if changed && verdict.is_none() {
                events.push(JobEvent::Progress {
                    id: id.clone(),
                    telemetry: entry.record.telemetry.clone(),
                });
            }
        }

        let history = self.settings.history_size;
        let mut doomed = None;
        match verdict {
            None => {}
            Some(Verdict::Complete) => {
                entry.tracker.finish(&mut entry.record.telemetry);
                events.push(JobEvent::Progress {
                    id: id.clone(),
                    telemetry: entry.record.telemetry.clone(),
                });
                events.push(JobEvent::Completed {
                    id: id.clone(),
                    exit_code: None,
                });
                state.retire(id, JobStatus::Completed, None, None, history);
                info!(job_id = %id, "worker reported completion");
            }
            Some(Verdict::Fail(error)) => {
                warn!(job_id = %id, error = %error, "render job failed on worker output");
                events.push(JobEvent::Failed {
                    id: id.clone(),
                    error: error.clone(),
                });
                doomed = state
                    .retire(id, JobStatus::Failed, None, Some(error), history)
                    .map(|entry| entry.child);
            }
        }
        let emitting = self.lock_emit();
        drop(state);

        self.emit(sink.as_ref(), events);
        drop(emitting);
        if let Some(child) = doomed {
            request_termination(&child, self.settings.stop_grace);
        }
    }

    fn handle_exit(&self, id: &JobId, token: u64, status: io::Result<ExitStatus>) {
        let code = status.as_ref().ok().and_then(ExitStatus::code);
        let history = self.settings.history_size;

        let mut state = self.lock_state();
        if state.manually_stopped.get(id) == Some(&token) {
            state.manually_stopped.remove(id);
            debug!(job_id = %id, ?code, "stopped worker exited");
            return;
        }
        let Some(entry) = state
            .jobs
            .get_mut(id)
            .filter(|entry| entry.token == token)
        else {
            trace!(job_id = %id, ?code, "exit observed for retired job");
            return;
        };
        let sink = Arc::clone(&entry.sink);

        let events = match &status {
            Ok(exit) if exit.success() => {
                entry.tracker.finish(&mut entry.record.telemetry);
                let telemetry = entry.record.telemetry.clone();
                state.retire(id, JobStatus::Completed, code, None, history);
                info!(job_id = %id, "render job completed");
                vec![
                    JobEvent::Progress {
                        id: id.clone(),
                        telemetry,
                    },
                    JobEvent::Completed {
                        id: id.clone(),
                        exit_code: code,
                    },
                ]
            }
            other => {
                let error = match (other, code) {
                    (Err(err), _) => format!("failed to observe worker exit: {err}"),
                    (Ok(_), Some(code)) => format!("render worker exited with code {code}"),
                    (Ok(exit), None) => format!("render worker terminated abnormally ({exit})"),
                };
                warn!(job_id = %id, error = %error, "render job failed");
                state.retire(id, JobStatus::Failed, code, Some(error.clone()), history);
                vec![JobEvent::Failed {
                    id: id.clone(),
                    error,
                }]
            }
        };
        let emitting = self.lock_emit();
        drop(state);

        self.emit(sink.as_ref(), events);
        drop(emitting);
    }
}

/// Splits a worker stream on `\r` and `\n`; progress lines are often redrawn
/// in place with carriage returns.
fn spawn_line_reader<R: Read + Send + 'static>(
    stream: StreamKind,
    reader: R,
    sender: Sender<(StreamKind, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line_buf: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match reader.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            match byte[0] {
                b'\r' | b'\n' => {
                    if line_buf.is_empty() {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&line_buf).to_string();
                    line_buf.clear();
                    if sender.send((stream, line)).is_err() {
                        return;
                    }
                }
                other => line_buf.push(other),
            }
        }

        if !line_buf.is_empty() {
            let line = String::from_utf8_lossy(&line_buf).to_string();
            let _ = sender.send((stream, line));
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;

    fn supervisor() -> Supervisor {
        Supervisor::new(SupervisorSettings {
            stop_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            ..SupervisorSettings::default()
        })
    }

    fn channel_sink() -> (Arc<dyn EventSink>, Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(tx), rx)
    }

    fn until_terminal(rx: &Receiver<JobEvent>, timeout: Duration) -> Vec<JobEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(event) => {
                    let done = event.is_terminal();
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        events
    }

    fn drain_for(rx: &Receiver<JobEvent>, window: Duration) -> Vec<JobEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(event) => events.push(event),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        events
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        check()
    }

    fn quitting_worker(output: &std::path::Path) -> String {
        format!(
            "sh -c \"echo 'Fra:1 Mem:1.00M (Peak 1.00M) | Sample 1/1'; echo 'Blender quit'\" -o {} -s 1 -e 1 -f 1",
            output.display()
        )
    }

    #[test]
    fn single_frame_job_completes_at_full_progress() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("frame_");
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        let id = supervisor.start(&quitting_worker(&output), sink).unwrap();
        let events = until_terminal(&rx, Duration::from_secs(10));

        assert!(matches!(events.first(), Some(JobEvent::Started { .. })));
        assert!(matches!(
            events.get(1),
            Some(JobEvent::Progress { telemetry, .. }) if telemetry.progress == 0.0
        ));
        assert_eq!(
            events.last(),
            Some(&JobEvent::Completed {
                id: id.clone(),
                exit_code: None,
            })
        );
        assert!(!supervisor.has_active_jobs());

        let record = supervisor
            .last_outputs()
            .into_iter()
            .find(|record| record.id == id)
            .unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.telemetry.progress, 100.0);
        assert_eq!(record.telemetry.current_frame, Some(1));
        assert_eq!(record.telemetry.completed_frames, 1);
        assert_eq!(record.telemetry.total_frames, 1);

        let effective = LaunchCommand::parse(&record.effective_command).unwrap();
        assert_eq!(effective.flag_value("-o"), Some(output.to_str().unwrap()));
        assert_eq!(record.output.output_file, Some(dir.path().join("frame_0001.png")));
    }

    #[test]
    fn existing_output_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("frame_0001.png"), b"taken").unwrap();
        let output = dir.path().join("frame_");
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        let id = supervisor.start(&quitting_worker(&output), sink).unwrap();
        until_terminal(&rx, Duration::from_secs(10));

        let record = supervisor
            .last_outputs()
            .into_iter()
            .find(|record| record.id == id)
            .unwrap();
        let effective = LaunchCommand::parse(&record.effective_command).unwrap();
        let expected = format!("{}_1", output.display());
        assert_eq!(effective.flag_value("-o"), Some(expected.as_str()));
        assert_ne!(record.raw_command, record.effective_command);
    }

    #[test]
    fn critical_line_fails_job_before_exit() {
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        let id = supervisor
            .start("sh -c \"echo 'Segmentation fault' >&2; exec sleep 30\"", sink)
            .unwrap();
        let events = until_terminal(&rx, Duration::from_secs(10));

        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed { error, .. }) if error == "Segmentation fault"
        ));
        assert!(!supervisor.has_active_jobs());
        assert!(supervisor.snapshot(&id).is_none());

        let later = drain_for(&rx, Duration::from_secs(1));
        assert!(later.iter().all(|event| !event.is_terminal()));
    }

    #[test]
    fn stop_yields_one_stopped_event_and_no_failure() {
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        let id = supervisor.start("sleep 30", sink).unwrap();
        assert!(supervisor.has_active_jobs());
        assert!(supervisor.stop(&id));
        assert!(!supervisor.has_active_jobs());
        assert!(!supervisor.stop(&id));

        assert!(wait_until(Duration::from_secs(5), || !supervisor.is_stop_pending(&id)));

        let events = drain_for(&rx, Duration::from_millis(300));
        let stopped = events
            .iter()
            .filter(|event| matches!(event, JobEvent::Stopped { .. }))
            .count();
        let failed = events
            .iter()
            .filter(|event| matches!(event, JobEvent::Failed { .. }))
            .count();
        assert_eq!(stopped, 1);
        assert_eq!(failed, 0);

        let record = supervisor.last_outputs().pop().unwrap();
        assert_eq!(record.status, JobStatus::Stopped);
    }

    #[test]
    fn nothing_follows_stopped_while_worker_keeps_writing() {
        let supervisor = Supervisor::new(SupervisorSettings {
            flood_limit: u32::MAX,
            stop_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            ..SupervisorSettings::default()
        });

        for _ in 0..5 {
            let (sink, rx) = channel_sink();
            let id = supervisor
                .start("sh -c 'while :; do echo \"Warning: busy\"; done'", sink)
                .unwrap();
            thread::sleep(Duration::from_millis(30));
            assert!(supervisor.stop(&id));
            assert!(wait_until(Duration::from_secs(5), || !supervisor.is_stop_pending(&id)));

            let events = drain_for(&rx, Duration::from_millis(200));
            let stopped_at = events
                .iter()
                .position(|event| matches!(event, JobEvent::Stopped { .. }))
                .unwrap();
            assert_eq!(stopped_at, events.len() - 1);
            assert!(events.iter().all(|event| event.job_id() == &id));
        }
    }

    #[test]
    fn stop_all_empties_the_table_synchronously() {
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        let ids: Vec<JobId> = (0..3)
            .map(|_| supervisor.start("sleep 30", Arc::clone(&sink)).unwrap())
            .collect();
        assert_eq!(supervisor.list_active_job_ids().len(), 3);

        supervisor.stop_all();
        assert!(!supervisor.has_active_jobs());
        assert!(supervisor.list_active_job_ids().is_empty());

        let events = drain_for(&rx, Duration::from_millis(500));
        for id in &ids {
            let stopped = events
                .iter()
                .filter(|event| matches!(event, JobEvent::Stopped { id: stopped } if stopped == id))
                .count();
            assert_eq!(stopped, 1);
        }
        assert!(wait_until(Duration::from_secs(5), || {
            ids.iter().all(|id| !supervisor.is_stop_pending(id))
        }));
    }

    #[test]
    fn nonzero_exit_is_reported_with_code() {
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        supervisor.start("sh -c 'exit 3'", sink).unwrap();
        let events = until_terminal(&rx, Duration::from_secs(10));
        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed { error, .. }) if error.contains("code 3")
        ));
    }

    #[test]
    fn zero_exit_completes() {
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        let id = supervisor.start("true", sink).unwrap();
        let events = until_terminal(&rx, Duration::from_secs(10));
        assert_eq!(
            events.last(),
            Some(&JobEvent::Completed {
                id,
                exit_code: Some(0),
            })
        );
    }

    #[test]
    fn diagnostics_are_forwarded_without_failing() {
        let supervisor = supervisor();
        let (sink, rx) = channel_sink();

        supervisor
            .start("sh -c \"echo 'Warning: missing texture' >&2; exit 0\"", sink)
            .unwrap();
        let events = until_terminal(&rx, Duration::from_secs(10));
        assert!(events.iter().any(|event| matches!(
            event,
            JobEvent::Diagnostic { level: LineClass::Warning, .. }
        )));
        assert!(matches!(events.last(), Some(JobEvent::Completed { .. })));
    }

    #[test]
    fn diagnostic_flood_terminates_the_job() {
        let supervisor = Supervisor::new(SupervisorSettings {
            flood_limit: 5,
            stop_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            ..SupervisorSettings::default()
        });
        let (sink, rx) = channel_sink();

        supervisor
            .start(
                "sh -c 'for i in 1 2 3 4 5 6 7 8 9 10; do echo \"Warning: noisy $i\"; done; exec sleep 30'",
                sink,
            )
            .unwrap();
        let events = until_terminal(&rx, Duration::from_secs(10));
        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed { error, .. }) if error.contains("diagnostics")
        ));
        assert!(!supervisor.has_active_jobs());
    }

    #[test]
    fn bus_sees_the_same_events_as_the_sink() {
        let supervisor = supervisor();
        let bus = supervisor.subscribe();
        let (sink, rx) = channel_sink();

        supervisor.start("true", sink).unwrap();
        let from_sink = until_terminal(&rx, Duration::from_secs(10));
        let from_bus = until_terminal(&bus, Duration::from_secs(10));
        assert_eq!(from_sink, from_bus);
    }

    #[test]
    fn spawn_errors_reach_the_caller() {
        let supervisor = supervisor();
        let (sink, _rx) = channel_sink();

        let err = supervisor
            .start("/nonexistent/render-worker -b scene.blend", sink)
            .unwrap_err();
        assert!(matches!(err, RenderError::BinaryNotFound { .. }));
        assert!(!supervisor.has_active_jobs());
    }

    #[test]
    fn stopping_an_unknown_job_is_refused() {
        let supervisor = supervisor();
        assert!(!supervisor.stop(&JobId::from("999999")));
    }
}
