use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::logger::RunLog;
use crate::platform::SearchRoots;

/// Finds the VSCode CLI, preferring whatever `PATH` resolves before the
/// per-OS fallback locations.
pub fn find_code(roots: &SearchRoots) -> Result<PathBuf> {
    if let Ok(found) = which::which("code") {
        return Ok(found);
    }
    for candidate in &roots.editor_clis {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    Err(Error::NotFound("VSCode CLI not found".to_string()))
}

/// Installs the extension unless it is already present. A failing listing
/// is ignored and the install is attempted anyway.
pub fn install_extension(code: &Path, extension_id: &str, log: &RunLog) -> Result<()> {
    if let Ok(output) = Command::new(code).arg("--list-extensions").output() {
        if output.status.success() {
            let listed = String::from_utf8_lossy(&output.stdout);
            if extension_listed(&listed, extension_id) {
                tracing::info!("Extension {} already installed", extension_id);
                log.log(&format!("extension {} already installed", extension_id));
                return Ok(());
            }
        }
    }

    tracing::info!("Installing extension {}...", extension_id);
    let output = Command::new(code)
        .args(["--install-extension", extension_id])
        .output()?;
    if !output.status.success() {
        return Err(Error::Install(format!(
            "{} install failed: {}",
            extension_id,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    log.log(&format!("extension {} installed", extension_id));
    Ok(())
}

/// Opens the workspace in the editor without waiting for it to exit.
pub fn open_workspace(code: &Path, dir: &Path) -> Result<()> {
    tracing::info!("Opening {} in VSCode", dir.display());
    Command::new(code).arg(dir).spawn()?;
    Ok(())
}

/// Case-insensitive membership test over `--list-extensions` output.
fn extension_listed(output: &str, extension_id: &str) -> bool {
    output
        .lines()
        .any(|line| line.trim().eq_ignore_ascii_case(extension_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_extensions_match_case_insensitively() {
        let output = "ms-python.python\nRocq-Prover.vsrocq\ndbaeumer.vscode-eslint\n";
        assert!(extension_listed(output, "rocq-prover.vsrocq"));
        assert!(!extension_listed(output, "coq-community.vscoq"));
    }

    #[test]
    fn empty_listing_matches_nothing() {
        assert!(!extension_listed("", "rocq-prover.vsrocq"));
        assert!(!extension_listed("\n\n", "rocq-prover.vsrocq"));
    }

    #[test]
    fn missing_cli_is_not_found() {
        // Only meaningful where no real editor is on PATH.
        if which::which("code").is_err() {
            let err = find_code(&SearchRoots::default()).unwrap_err();
            assert!(err.is_not_found());
        }
    }
}
