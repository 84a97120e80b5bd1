//! Platform-specific worker termination.
//!
//! Windows kills the whole process tree through `taskkill`, falling back to a
//! direct kill of the worker. Unix sends `SIGTERM` and escalates to `SIGKILL`
//! once the grace period runs out. Both return as soon as the request is issued.

use std::process::Child;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub(crate) type SharedChild = Arc<Mutex<Child>>;

fn already_exited(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(Some(_)))
}

#[cfg(unix)]
pub(crate) fn request_termination(child: &SharedChild, grace: Duration) -> bool {
    use std::thread;

    let sent = {
        let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
        if already_exited(&mut guard) {
            return true;
        }
        let pid = guard.id();
        // SAFETY: the child has not been reaped, so `pid` still names our worker.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            true
        } else {
            tracing::warn!(pid, "SIGTERM failed, killing worker directly");
            guard.kill().is_ok()
        }
    };

    let child = Arc::clone(child);
    thread::spawn(move || {
        thread::sleep(grace);
        let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
        if !already_exited(&mut guard) {
            tracing::warn!(pid = guard.id(), "worker ignored SIGTERM, sending SIGKILL");
            let _ = guard.kill();
        }
    });

    sent
}

#[cfg(windows)]
pub(crate) fn request_termination(child: &SharedChild, _grace: Duration) -> bool {
    use std::process::{Command, Stdio};

    let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
    if already_exited(&mut guard) {
        return true;
    }
    let pid = guard.id().to_string();
    let tree_kill = Command::new("taskkill")
        .args(["/pid", pid.as_str(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match tree_kill {
        Ok(status) if status.success() => true,
        other => {
            tracing::warn!(pid = %pid, result = ?other, "taskkill failed, killing worker directly");
            guard.kill().is_ok()
        }
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn request_termination(child: &SharedChild, _grace: Duration) -> bool {
    let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
    already_exited(&mut guard) || guard.kill().is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::{Command, Stdio};
    use std::time::Instant;

    use super::*;

    fn wait_exit(child: &SharedChild, timeout: Duration) -> Option<std::process::ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = child.lock().unwrap().try_wait() {
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }

    #[test]
    fn sigterm_stops_a_cooperative_worker() {
        let child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let child: SharedChild = Arc::new(Mutex::new(child));

        assert!(request_termination(&child, Duration::from_secs(2)));
        let status = wait_exit(&child, Duration::from_secs(5)).expect("worker did not exit");
        assert!(!status.success());
    }

    #[test]
    fn stubborn_worker_is_killed_after_grace() {
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        let child: SharedChild = Arc::new(Mutex::new(child));
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        assert!(request_termination(&child, Duration::from_millis(300)));
        let status = wait_exit(&child, Duration::from_secs(5)).expect("worker survived SIGKILL");
        assert!(!status.success());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn exited_worker_counts_as_terminated() {
        let child = Command::new("true").spawn().unwrap();
        let child: SharedChild = Arc::new(Mutex::new(child));
        wait_exit(&child, Duration::from_secs(5)).unwrap();
        assert!(request_termination(&child, Duration::from_millis(10)));
    }
}
