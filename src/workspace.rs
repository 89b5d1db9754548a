use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::logger::RunLog;

/// Directory created under the user's home for example sources.
pub const WORKSPACE_DIR_NAME: &str = "rocq-workspace";

const MAIN_V: &str = include_str!("../templates/main.v");
const TEST_V: &str = include_str!("../templates/test.v");
const ROCQ_PROJECT: &str = include_str!("../templates/_RocqProject");

pub fn default_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;
    Ok(home.join(WORKSPACE_DIR_NAME))
}

/// Creates the workspace skeleton. Existing files are never overwritten,
/// so re-running keeps user edits.
pub fn create(dir: &Path, log: &RunLog) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::create_dir_all(dir.join(".vscode"))?;

    for (name, contents) in [
        ("main.v", MAIN_V),
        ("test.v", TEST_V),
        ("_RocqProject", ROCQ_PROJECT),
    ] {
        let path = dir.join(name);
        if path.exists() {
            tracing::debug!("Keeping existing {}", path.display());
            continue;
        }
        fs::write(&path, contents)?;
        log.log(&format!("wrote {}", path.display()));
    }
    Ok(())
}

/// Shell helpers for entering the switch environment. Rewritten on every
/// run so they always point at the current switch.
pub fn write_activation_scripts(dir: &Path, switch: &str, log: &RunLog) -> Result<()> {
    let activate = format!(
        "#!/bin/sh\n\
         # Load the {0} environment into the current shell.\n\
         # Usage: . ./activate.sh\n\
         eval \"$(opam env --switch={0} --set-switch)\"\n\
         echo \"Rocq environment '{0}' activated.\"\n",
        switch
    );
    let subshell = format!(
        "#!/bin/sh\n\
         # Open a subshell with the {0} environment active.\n\
         exec opam exec --switch={0} -- \"${{SHELL:-/bin/bash}}\"\n",
        switch
    );

    for (name, contents) in [("activate.sh", activate), ("activate-shell.sh", subshell)] {
        let path = dir.join(name);
        fs::write(&path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        log.log(&format!("wrote {}", path.display()));
    }
    Ok(())
}

/// Points the extension at the language server, preserving whatever else
/// is configured in the workspace settings.
pub fn write_editor_settings(
    dir: &Path,
    settings_key: &str,
    server: &Path,
    log: &RunLog,
) -> Result<()> {
    let vscode_dir = dir.join(".vscode");
    fs::create_dir_all(&vscode_dir)?;
    let settings_path = vscode_dir.join("settings.json");

    let mut settings: serde_json::Map<String, serde_json::Value> = if settings_path.is_file() {
        let data = fs::read_to_string(&settings_path)?;
        serde_json::from_str(&data).map_err(|err| {
            Error::Config(format!(
                "could not parse {}: {}",
                settings_path.display(),
                err
            ))
        })?
    } else {
        serde_json::Map::new()
    };

    settings.insert(
        settings_key.to_string(),
        serde_json::Value::String(settings_path_value(server)),
    );

    let mut data = serde_json::to_string_pretty(&settings)
        .map_err(|err| Error::Config(format!("could not encode settings: {}", err)))?;
    data.push('\n');
    fs::write(&settings_path, data)?;
    log.log(&format!("wrote {}", settings_path.display()));
    Ok(())
}

/// Settings values use forward slashes on every OS, and the extension
/// expects the server path without the Windows exe suffix.
pub fn settings_path_value(path: &Path) -> String {
    let text = path.to_string_lossy();
    let trimmed = text.strip_suffix(".exe").unwrap_or(&text);
    trimmed.replace('\\', "/")
}
