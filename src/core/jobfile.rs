use std::fs;
use std::path::Path;

use crate::core::error::RenderError;

/// Reads a job file: one worker command per line, `#` comments, blank lines
/// ignored, and a trailing `\` joining a command with the next line.
pub fn parse_job_file(path: &Path) -> Result<Vec<String>, RenderError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_job_text(&text))
}

pub fn parse_job_text(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current_command = String::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() && current_command.is_empty() {
            continue;
        }

        if trimmed.starts_with('#') {
            continue;
        }

        if let Some(stripped) = trimmed.strip_suffix('\\') {
            current_command.push_str(stripped.trim());
            current_command.push(' ');
        } else {
            current_command.push_str(trimmed);
            let command = current_command.trim();
            if !command.is_empty() {
                commands.push(command.to_string());
            }
            current_command.clear();
        }
    }

    let tail = current_command.trim();
    if !tail.is_empty() {
        commands.push(tail.to_string());
    }

    commands
}
