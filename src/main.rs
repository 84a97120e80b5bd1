mod cli;
mod tui;

use clap::Parser;

use rendflow::config::{resolve_config_path, AppConfig};
use rendflow::core::{jobfile, version};
use rendflow::logging::{self, LogTarget};

use cli::{Cli, CliError, Commands};

fn main() {
    match run(Cli::parse()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<bool, CliError> {
    let config = AppConfig::load(&resolve_config_path(cli.config.as_deref()))?;

    match cli.command {
        Some(Commands::Run(args)) => {
            logging::init(&config.logging, LogTarget::Stderr).map_err(CliError::LogFile)?;
            cli::run_headless(&config, args)
        }
        Some(Commands::Version(args)) => {
            logging::init(&config.logging, LogTarget::Stderr).map_err(CliError::LogFile)?;
            let executable = args
                .executable
                .unwrap_or_else(|| config.worker.executable.clone());
            println!("{}", version::get_version(&executable, &config.worker.version_flag));
            Ok(true)
        }
        None => {
            logging::init(&config.logging, LogTarget::FileOnly).map_err(CliError::LogFile)?;
            let queue = match &cli.file {
                Some(path) => jobfile::parse_job_file(path)?,
                None => Vec::new(),
            };
            tui::run(&config, queue)?;
            Ok(true)
        }
    }
}
