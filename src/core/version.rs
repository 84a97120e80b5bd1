use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

pub const UNKNOWN_VERSION: &str = "Unknown";

static RE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.\d+(?:\.\d+)*)").expect("version regex"));

/// First dotted version number in `text`, e.g. `4.1.0` from `Blender 4.1.0`.
pub fn parse_version(text: &str) -> Option<String> {
    RE_VERSION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Runs `executable flag` synchronously and extracts its version. Any failure
/// yields [`UNKNOWN_VERSION`].
pub fn get_version(executable: &str, flag: &str) -> String {
    let output = Command::new(executable)
        .arg(flag)
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_version(&stdout).unwrap_or_else(|| UNKNOWN_VERSION.to_string())
        }
        Ok(output) => {
            debug!(executable, status = %output.status, "version probe exited unsuccessfully");
            UNKNOWN_VERSION.to_string()
        }
        Err(err) => {
            debug!(executable, error = %err, "version probe failed to start");
            UNKNOWN_VERSION.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_dotted_number() {
        assert_eq!(parse_version("Blender 4.1.0\n\tbuild date: 2024-03-25").as_deref(), Some("4.1.0"));
        assert_eq!(parse_version("Blender 2.93").as_deref(), Some("2.93"));
        assert_eq!(parse_version("no digits here"), None);
    }

    #[cfg(unix)]
    #[test]
    fn probes_executable_output() {
        assert_eq!(get_version("echo", "Blender 4.1.0"), "4.1.0");
        assert_eq!(get_version("false", "--version"), UNKNOWN_VERSION);
        assert_eq!(get_version("/nonexistent/render-worker", "--version"), UNKNOWN_VERSION);
    }
}
