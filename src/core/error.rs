use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render worker binary not found: {program}")]
    BinaryNotFound { program: String },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },
    #[error("no free output path near {}", path.display())]
    OutputPathExhausted { path: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub(crate) fn from_spawn(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            RenderError::BinaryNotFound {
                program: program.to_string(),
            }
        } else {
            RenderError::Spawn {
                program: program.to_string(),
                source: err,
            }
        }
    }
}
