use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::logger::RunLog;
use crate::manifest::Manifest;
use crate::names;

/// Runs a signed installer elevated and waits for it. The UAC prompt and
/// the installer's own progress window are the user-visible part.
pub fn run_elevated_installer(installer: &Path, install_dir: &Path, log: &RunLog) -> Result<()> {
    log.log(&format!(
        "Launching {} elevated, target {}",
        installer.display(),
        install_dir.display()
    ));

    let command = powershell_command(installer, install_dir);
    let output = Command::new("powershell")
        .args(["-NoProfile", "-Command", &command])
        .output()?;

    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        log.log(&format!(
            "[installer] {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
        return Err(Error::Install(format!(
            "installer exited with code {}",
            code
        )));
    }
    log.log("Installer finished");
    Ok(())
}

/// Inno Setup flags: skip the startup prompt, run silent without a
/// reboot, install into the requested directory.
pub(crate) fn installer_arguments(install_dir: &Path) -> Vec<String> {
    vec![
        "/SP-".to_string(),
        "/SILENT".to_string(),
        "/NORESTART".to_string(),
        format!("/DIR={}", install_dir.display()),
    ]
}

/// `Start-Process -Verb RunAs` is the supported way to elevate from an
/// unelevated process; `exit $p.ExitCode` makes the installer's exit code
/// PowerShell's own.
pub(crate) fn powershell_command(installer: &Path, install_dir: &Path) -> String {
    let args = installer_arguments(install_dir)
        .iter()
        .map(|arg| ps_quote(arg))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "$p = Start-Process -FilePath {} -ArgumentList {} -Verb RunAs -Wait -PassThru; exit $p.ExitCode",
        ps_quote(&installer.display().to_string()),
        args
    )
}

fn ps_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Default target mirrors the installer's own naming:
/// `C:\Rocq-platform~<toolchain major.minor>~<release year.month>`.
pub fn default_install_dir(manifest: &Manifest) -> PathBuf {
    PathBuf::from(format!(
        r"C:\Rocq-platform~{}~{}",
        names::major_minor(&manifest.toolchain_version),
        names::major_minor(&manifest.release_id)
    ))
}
