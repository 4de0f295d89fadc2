use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LdaError {
    /// Malformed or inconsistent settings. Detected before any sampling work.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The sampler or a count model was driven outside of its contract.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("I/O failure on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LdaError {
    pub(crate) fn io<P: Into<PathBuf>>(path: P, source: io::Error) -> LdaError {
        LdaError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LdaError>;
