use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for a bootstrap run. `Config` through `Install` abort the
/// pipeline; `NotFound` degrades the result and lets the run finish.
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest is malformed or has no usable asset for this platform.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A required external tool is absent and could not be bootstrapped.
    /// The message carries manual remediation steps.
    #[error("missing prerequisite '{tool}': {message}")]
    Prerequisite { tool: String, message: String },

    #[error("install failed: {0}")]
    Install(String),

    /// The language server or the editor could not be located.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Download(err.to_string())
    }
}

impl Error {
    /// True for conditions the pipeline recovers from by degrading the
    /// result instead of aborting.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
