use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::error::{Error, Result};

const STATE_DIR: &str = ".rocq-setup";

/// Persistent per-run log. Every noteworthy action and every error lands
/// here with a timestamp; the console layer stays terse.
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Creates `~/.rocq-setup/logs/rocq-setup-<stamp>.log`.
    pub fn create() -> Result<RunLog> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "home directory not found",
            ))
        })?;
        Self::create_in(&home.join(STATE_DIR).join("logs"))
    }

    pub fn create_in(dir: &Path) -> Result<RunLog> {
        fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("rocq-setup-{}.log", stamp));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RunLog {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, message: &str) {
        let line = format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message);
        tracing::debug!("{}", message);
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(file, "{}", line);
    }
}
