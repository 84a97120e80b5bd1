use std::time::Duration;

use crate::core::event::JobEvent;
use crate::core::job::JobRecord;
use crate::core::tracker::Telemetry;

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

pub fn format_memory(megabytes: f64) -> String {
    if megabytes >= 1024.0 {
        format!("{:.2} GB", megabytes / 1024.0)
    } else {
        format!("{:.2} MB", megabytes)
    }
}

pub fn format_progress_line(telemetry: &Telemetry) -> String {
    let mut line = format!("{:5.1}%", telemetry.progress);

    match telemetry.current_frame {
        Some(frame) => line.push_str(&format!(
            " frame={frame} ({}/{})",
            telemetry.completed_frames, telemetry.total_frames
        )),
        None => line.push_str(&format!(" frames={}", telemetry.total_frames)),
    }
    if let (Some(current), Some(total)) = (telemetry.current_sample, telemetry.total_samples) {
        line.push_str(&format!(" sample={current}/{total}"));
    }
    if let (Some(current), Some(total)) = (telemetry.current_tile, telemetry.total_tiles) {
        line.push_str(&format!(" tile={current}/{total}"));
    }
    if let Some(memory) = telemetry.memory_usage_mb {
        line.push_str(&format!(" mem={}", format_memory(memory)));
        if let Some(peak) = telemetry.peak_memory_mb {
            line.push_str(&format!(" peak={}", format_memory(peak)));
        }
    }
    if telemetry.in_compositing {
        let op = telemetry.compositing_operation.as_deref().unwrap_or("-");
        line.push_str(&format!(" compositing={op}"));
    }
    if let Some(remaining) = &telemetry.remaining_time {
        line.push_str(&format!(" remaining={remaining}"));
    }
    line
}

pub fn format_event_line(event: &JobEvent) -> String {
    match event {
        JobEvent::Started { id, command, .. } => format!("[{id}] started: {command}"),
        JobEvent::Progress { id, telemetry } => {
            format!("[{id}] {}", format_progress_line(telemetry))
        }
        JobEvent::Diagnostic { id, level, message } => {
            format!("[{id}] {level:?}: {message}")
        }
        JobEvent::Completed { id, exit_code } => match exit_code {
            Some(code) => format!("[{id}] completed (exit {code})"),
            None => format!("[{id}] completed"),
        },
        JobEvent::Failed { id, error } => format!("[{id}] failed: {error}"),
        JobEvent::Stopped { id } => format!("[{id}] stopped"),
    }
}

pub fn format_record_line(record: &JobRecord) -> String {
    let elapsed = record
        .end_time
        .unwrap_or_else(chrono::Utc::now)
        .signed_duration_since(record.start_time)
        .to_std()
        .unwrap_or_default();
    let output = record
        .output
        .output_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "[{}] {:?} {:.1}% elapsed={} output={output}",
        record.id,
        record.status,
        record.telemetry.progress,
        format_duration(elapsed)
    );
    if let Some(error) = &record.error {
        line.push_str(&format!(" error={error}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use crate::core::grammar::FrameRange;
    use crate::core::job::JobId;

    use super::*;

    #[test]
    fn durations_and_memory() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_memory(512.0), "512.00 MB");
        assert_eq!(format_memory(2048.0), "2.00 GB");
    }

    #[test]
    fn progress_line_lists_known_fields() {
        let mut telemetry = Telemetry::new(FrameRange { start: 1, end: 4 });
        telemetry.progress = 37.5;
        telemetry.current_frame = Some(2);
        telemetry.completed_frames = 1;
        telemetry.current_sample = Some(64);
        telemetry.total_samples = Some(128);
        telemetry.memory_usage_mb = Some(100.0);
        telemetry.peak_memory_mb = Some(120.0);

        assert_eq!(
            format_progress_line(&telemetry),
            " 37.5% frame=2 (1/4) sample=64/128 mem=100.00 MB peak=120.00 MB"
        );
    }

    #[test]
    fn event_lines_name_the_job() {
        let id = JobId::from("77");
        assert_eq!(
            format_event_line(&JobEvent::Failed {
                id: id.clone(),
                error: "Segmentation fault".to_string(),
            }),
            "[77] failed: Segmentation fault"
        );
        assert_eq!(
            format_event_line(&JobEvent::Completed {
                id,
                exit_code: Some(0),
            }),
            "[77] completed (exit 0)"
        );
    }
}
