use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};

use rendflow::config::{AppConfig, ConfigError};
use rendflow::core::formatter::format_event_line;
use rendflow::core::jobfile;
use rendflow::core::{EventSink, JobEvent, RenderError, Supervisor};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to encode event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
    #[error("failed to open log file: {0}")]
    LogFile(#[source] std::io::Error),
    #[error("nothing to run: pass a worker command or --file")]
    NoJobs,
}

#[derive(Debug, Parser)]
#[command(name = "rendflow", version, about = "Supervises render worker processes")]
pub struct Cli {
    /// Configuration file (defaults to $RENDFLOW_CONFIG, then ./rendflow.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Job file to start when the dashboard opens
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start jobs without the dashboard and stream their events until all finish
    Run(RunArgs),
    /// Print the version reported by a worker executable
    Version(VersionArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Emit one JSON object per event instead of readable lines
    #[arg(long)]
    pub json: bool,

    /// Job file with one worker command per line
    #[arg(long = "file", value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Worker command line, e.g. `blender -b scene.blend -o //out/frame_ -f 1`
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct VersionArgs {
    /// Executable to probe; defaults to the configured worker
    #[arg(value_name = "EXECUTABLE")]
    pub executable: Option<String>,
}

/// Commands typed into the dashboard input line.
#[derive(Debug, Parser)]
#[command(name = "rendflow", disable_help_subcommand = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum ShellCommand {
    /// Launch the configured worker executable with these arguments
    Render {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Launch an arbitrary worker command
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Stop one job by id
    Stop { id: String },
    /// Stop every active job
    #[command(name = "stopall")]
    StopAll,
    /// List active jobs
    Jobs,
    /// Show recently finished jobs
    Last,
    /// Probe a worker executable's version
    Version { executable: Option<String> },
    /// Start every command in a job file
    Batch { file: PathBuf },
}

impl ShellCommand {
    /// Worker command line for `render`/`run`, joined back into one string.
    pub fn launch_line(&self, executable: &str) -> Option<String> {
        match self {
            ShellCommand::Render { args } => {
                let mut words = vec![executable.to_string()];
                words.extend(args.iter().cloned());
                Some(shell_words::join(words))
            }
            ShellCommand::Run { command } => Some(shell_words::join(command)),
            _ => None,
        }
    }
}

pub fn parse_line(line: &str) -> Result<ShellCommand, String> {
    let mut argv = vec!["rendflow".to_string()];
    let tokens = shell_words::split(line).map_err(|err| err.to_string())?;
    argv.extend(tokens);

    let parsed = ShellLine::try_parse_from(argv).map_err(|err| err.to_string())?;
    Ok(parsed.command)
}

/// Starts every requested job and prints events until each job is terminal.
/// Returns false when any job could not start or ended in failure.
pub fn run_headless(config: &AppConfig, args: RunArgs) -> Result<bool, CliError> {
    let mut commands = Vec::new();
    if let Some(path) = &args.file {
        commands.extend(jobfile::parse_job_file(path)?);
    }
    if !args.command.is_empty() {
        commands.push(shell_words::join(&args.command));
    }
    if commands.is_empty() {
        return Err(CliError::NoJobs);
    }

    let supervisor = Supervisor::new(config.supervisor_settings());
    let (tx, rx) = mpsc::channel::<JobEvent>();
    let sink: Arc<dyn EventSink> = Arc::new(tx);

    let mut pending = HashSet::new();
    let mut success = true;
    for command in &commands {
        match supervisor.start(command, Arc::clone(&sink)) {
            Ok(id) => {
                pending.insert(id);
            }
            Err(err) => {
                error!(command = %command, error = %err, "failed to start job");
                eprintln!("error: {command}: {err}");
                success = false;
            }
        }
    }
    drop(sink);
    info!(jobs = pending.len(), "waiting for jobs");

    while !pending.is_empty() {
        let Ok(event) = rx.recv() else {
            break;
        };
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", format_event_line(&event));
        }
        if event.is_terminal() {
            pending.remove(event.job_id());
            if matches!(event, JobEvent::Failed { .. }) {
                success = false;
            }
        }
    }

    Ok(success)
}
