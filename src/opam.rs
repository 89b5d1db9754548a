use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::{Error, Result};
use crate::install::InstallOptions;
use crate::logger::RunLog;
use crate::manifest::{Manifest, PackageSpec, SwitchAsset};
use crate::names;

/// Empirical output volume of a full platform build; only shapes the
/// progress estimate, never correctness.
const INSTALL_OUTPUT_LINES: f64 = 200.0;

const OPAM_INSTALL_SCRIPT: &str = "https://opam.ocaml.org/install.sh";
const OPAM_DOCS: &str = "https://opam.ocaml.org/doc/Install.html";

const SYSTEM_PACKAGE_MANAGERS: [&str; 5] = ["apt-get", "dnf", "yum", "pacman", "zypper"];

/// Build dependencies opam and the switch builds lean on.
const BUILD_DEPS: [&str; 5] = ["curl", "gcc", "make", "unzip", "bubblewrap"];

pub struct SwitchOutcome {
    pub name: String,
    pub bin_dir: PathBuf,
}

/// Builds the pinned platform environment end to end: opam presence,
/// bare init, switch, repository, packages, then a version gate on the
/// installed toolchain.
pub fn install_switch(
    spec: &SwitchAsset,
    manifest: &Manifest,
    options: &InstallOptions,
    log: &RunLog,
    on_progress: &mut dyn FnMut(f64),
) -> Result<SwitchOutcome> {
    let opam = ensure_opam(log)?;
    init_opam(&opam, log)?;

    let name = names::switch_name(
        &spec.switch_prefix,
        &manifest.release_id,
        &manifest.toolchain_version,
        options.snapshot.as_deref(),
    );
    create_switch(&opam, &name, &spec.compiler, options.recreate, log)?;
    configure_repo(&opam, &name, spec, log)?;
    install_packages(&opam, &name, spec, &options.enabled_flags(), log, on_progress)?;

    let bin_dir = bin_dir_via(&opam, &name)?;
    verify_toolchain(&bin_dir, &manifest.toolchain_version, log)?;
    Ok(SwitchOutcome { name, bin_dir })
}

/// Raw `opam switch list --short` output, if opam is available at all.
/// Detection never bootstraps anything.
pub fn switch_list() -> Option<String> {
    let opam = which::which("opam").ok()?;
    let output = Command::new(opam)
        .args(["switch", "list", "--short"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Absolute bin directory of a switch. `NotFound` so callers resolving an
/// already-installed switch can degrade instead of aborting.
pub fn switch_bin_dir(name: &str) -> Result<PathBuf> {
    let opam = which::which("opam")
        .map_err(|_| Error::NotFound("opam is not on PATH".to_string()))?;
    bin_dir_via(&opam, name).map_err(|err| Error::NotFound(err.to_string()))
}

/// Makes sure a 2.x opam is on PATH, bootstrapping it with the official
/// install script when missing.
pub fn ensure_opam(log: &RunLog) -> Result<PathBuf> {
    if let Ok(path) = which::which("opam") {
        let output = Command::new(&path).arg("--version").output()?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !version.starts_with("2.") {
            return Err(Error::Prerequisite {
                tool: "opam".to_string(),
                message: format!("need opam 2.x, found '{}'; see {}", version, OPAM_DOCS),
            });
        }
        log.log(&format!("Using opam {} at {}", version, path.display()));
        return Ok(path);
    }

    log.log("opam not found, bootstrapping it");
    bootstrap_opam(log)
}

fn opam_cmd(opam: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(opam);
    cmd.args(args).env("OPAMCONFIRMLEVEL", "unsafe-yes");
    cmd
}

fn detect_system_package_manager() -> Option<PathBuf> {
    SYSTEM_PACKAGE_MANAGERS
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Best effort: the packages are usually preinstalled, and the opam script
/// surfaces anything actually missing.
fn install_build_deps(pm: &Path, log: &RunLog) {
    let name = pm
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut cmd = Command::new(pm);
    if name == "pacman" {
        cmd.args(["-S", "--noconfirm"]).args(BUILD_DEPS);
    } else {
        cmd.arg("install").arg("-y").args(BUILD_DEPS);
    }
    log.log(&format!("Installing build dependencies via {}", name));
    match cmd.output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            tracing::warn!("Dependency install via {} failed, continuing", name);
            log.log(&format!(
                "[{}] {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Err(err) => tracing::warn!("Could not run {}: {}", name, err),
    }
}

fn bootstrap_opam(log: &RunLog) -> Result<PathBuf> {
    match detect_system_package_manager() {
        Some(pm) => install_build_deps(&pm, log),
        None => tracing::warn!("No supported system package manager found"),
    }

    let staging = tempfile::tempdir()?;
    let script = staging.path().join("install.sh");
    let fetched = Command::new("curl")
        .args(["-fsSL", "-o"])
        .arg(&script)
        .arg(OPAM_INSTALL_SCRIPT)
        .output()
        .map_err(|err| Error::Prerequisite {
            tool: "curl".to_string(),
            message: format!(
                "cannot fetch the opam install script: {}; install opam manually: {}",
                err, OPAM_DOCS
            ),
        })?;
    if !fetched.status.success() {
        return Err(Error::Prerequisite {
            tool: "opam".to_string(),
            message: format!(
                "fetching {} failed: {}; install opam manually: {}",
                OPAM_INSTALL_SCRIPT,
                String::from_utf8_lossy(&fetched.stderr).trim(),
                OPAM_DOCS
            ),
        });
    }

    let bin_dir = dirs::home_dir()
        .map(|home| home.join(".local/bin"))
        .ok_or_else(|| Error::Prerequisite {
            tool: "opam".to_string(),
            message: format!(
                "no home directory to hold the opam binary; install opam manually: {}",
                OPAM_DOCS
            ),
        })?;
    fs::create_dir_all(&bin_dir)?;

    log.log("Running the opam install script (download only)");
    let output = Command::new("sh")
        .arg(&script)
        .arg("--download-only")
        .current_dir(staging.path())
        .output()?;
    if !output.status.success() {
        return Err(Error::Prerequisite {
            tool: "opam".to_string(),
            message: format!(
                "the opam install script failed: {}; install opam manually: {}",
                String::from_utf8_lossy(&output.stderr).trim(),
                OPAM_DOCS
            ),
        });
    }

    let downloaded = find_downloaded_opam(staging.path()).ok_or_else(|| Error::Prerequisite {
        tool: "opam".to_string(),
        message: format!(
            "the install script produced no opam binary; install opam manually: {}",
            OPAM_DOCS
        ),
    })?;
    let target = bin_dir.join("opam");
    fs::copy(&downloaded, &target)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&target)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&target, perms)?;
    }
    log.log(&format!("Bootstrapped opam at {}", target.display()));
    Ok(target)
}

fn find_downloaded_opam(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries.flatten().map(|entry| entry.path()).find(|path| {
        path.is_file()
            && path
                .file_name()
                .map(|name| {
                    let name = name.to_string_lossy();
                    name == "opam" || name.starts_with("opam-")
                })
                .unwrap_or(false)
    })
}

/// A bare init is enough; switches carry the compilers.
fn init_opam(opam: &Path, log: &RunLog) -> Result<()> {
    if let Some(home) = dirs::home_dir() {
        if home.join(".opam").exists() {
            log.log("opam already initialized");
            return Ok(());
        }
    }

    log.log("Initializing opam (bare, sandbox disabled)");
    let output = opam_cmd(opam, &["init", "-y", "--bare", "--disable-sandboxing"]).output()?;
    if !output.status.success() {
        return Err(Error::Install(format!(
            "opam init failed: {}",
            combined_output(&output)
        )));
    }
    Ok(())
}

fn create_switch(
    opam: &Path,
    name: &str,
    compiler: &str,
    recreate: bool,
    log: &RunLog,
) -> Result<()> {
    let existing = opam_cmd(opam, &["switch", "list", "--short"]).output()?;
    let exists = existing.status.success()
        && switch_exists(&String::from_utf8_lossy(&existing.stdout), name);

    if exists {
        if !recreate {
            log.log(&format!("Reusing existing switch {}", name));
            return Ok(());
        }
        log.log(&format!("Removing switch {} for recreation", name));
        let removed = opam_cmd(opam, &["switch", "remove", name, "-y"]).output()?;
        if !removed.status.success() {
            return Err(Error::Install(format!(
                "cannot remove switch {}: {}",
                name,
                combined_output(&removed)
            )));
        }
    }

    log.log(&format!("Creating switch {} with {}", name, compiler));
    let created = opam_cmd(opam, &["switch", "create", name, compiler, "-y"]).output()?;
    if !created.status.success() {
        return Err(Error::Install(format!(
            "cannot create switch {}: {}",
            name,
            combined_output(&created)
        )));
    }
    Ok(())
}

fn configure_repo(opam: &Path, switch: &str, spec: &SwitchAsset, log: &RunLog) -> Result<()> {
    let switch_arg = format!("--switch={}", switch);
    log.log(&format!(
        "Pinning repository {} -> {}",
        spec.repo_name, spec.repo_url
    ));

    let added = opam_cmd(
        opam,
        &[
            "repo",
            "add",
            &switch_arg,
            "--rank=1",
            &spec.repo_name,
            &spec.repo_url,
            "-y",
        ],
    )
    .output()?;
    if !added.status.success() {
        // Usually already registered under another URL.
        let reset = opam_cmd(
            opam,
            &[
                "repo",
                "set-url",
                &switch_arg,
                &spec.repo_name,
                &spec.repo_url,
                "-y",
            ],
        )
        .output()?;
        if !reset.status.success() {
            return Err(Error::Install(format!(
                "cannot configure repository {}: {}",
                spec.repo_name,
                combined_output(&reset)
            )));
        }
    }

    // Keep unrelated repositories out of the switch's view.
    let forced = opam_cmd(
        opam,
        &["repo", "set-repos", &switch_arg, &spec.repo_name, "default"],
    )
    .output()?;
    if !forced.status.success() {
        tracing::warn!("Could not pin the repository selection for {}", switch);
        log.log(&format!("[opam] {}", combined_output(&forced)));
    }

    let updated = opam_cmd(opam, &["update", &switch_arg]).output()?;
    if !updated.status.success() {
        tracing::warn!("opam update failed, package data may be stale");
        log.log(&format!("[opam] {}", combined_output(&updated)));
    }
    Ok(())
}

fn install_packages(
    opam: &Path,
    switch: &str,
    spec: &SwitchAsset,
    enabled: &[String],
    log: &RunLog,
    on_progress: &mut dyn FnMut(f64),
) -> Result<()> {
    let pins = package_args(&spec.packages, enabled);
    if pins.is_empty() {
        return Err(Error::Config(format!(
            "no packages selected for switch {}",
            switch
        )));
    }
    log.log(&format!(
        "Installing {} packages into {}",
        pins.len(),
        switch
    ));

    let switch_arg = format!("--switch={}", switch);
    let mut args: Vec<&str> = vec!["install", &switch_arg, "-y"];
    args.extend(pins.iter().map(String::as_str));

    let mut child = opam_cmd(opam, &args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr_handle = child.stderr.take().map(|stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf);
            buf
        })
    });

    let mut line_count = 0usize;
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            line_count += 1;
            log.log(&format!("[opam] {}", line));
            on_progress(fraction_for_lines(line_count));
        }
    }

    let status = child.wait()?;
    let stderr_text = stderr_handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    for line in stderr_text.lines() {
        log.log(&format!("[opam] {}", line));
    }
    if !status.success() {
        return Err(Error::Install(format!(
            "opam install exited with {}: {}",
            status,
            tail_of(&stderr_text, 20)
        )));
    }
    Ok(())
}

fn bin_dir_via(opam: &Path, name: &str) -> Result<PathBuf> {
    let switch_arg = format!("--switch={}", name);
    let output = opam_cmd(opam, &["var", &switch_arg, "bin"]).output()?;
    if !output.status.success() {
        return Err(Error::Install(format!(
            "cannot resolve the bin directory of switch {}: {}",
            name,
            combined_output(&output)
        )));
    }
    let dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if dir.is_empty() {
        return Err(Error::Install(format!(
            "switch {} reports no bin directory",
            name
        )));
    }
    Ok(PathBuf::from(dir))
}

/// The installed toolchain must identify itself with the pinned
/// major.minor, otherwise the switch holds the wrong release.
fn verify_toolchain(bin_dir: &Path, toolchain_version: &str, log: &RunLog) -> Result<()> {
    let product = names::ProductNames::for_version(toolchain_version);
    let binary = bin_dir.join(product.toolchain_binary);
    if !binary.is_file() {
        return Err(Error::Install(format!(
            "{} missing from {} after install",
            product.toolchain_binary,
            bin_dir.display()
        )));
    }

    let expected = names::major_minor(toolchain_version);
    let output = Command::new(&binary).arg("--version").output()?;
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if !text.contains(&expected) {
        return Err(Error::Install(format!(
            "{} reports '{}', expected version {}",
            product.toolchain_binary,
            text.trim(),
            expected
        )));
    }
    log.log(&format!("{} {} verified", product.toolchain_binary, expected));
    Ok(())
}

/// One estimate tick per output line, capped until the process exits.
pub(crate) fn fraction_for_lines(line_count: usize) -> f64 {
    (line_count as f64 / INSTALL_OUTPUT_LINES).min(0.95)
}

/// `name=version` pins for every package whose optional flag (if any) is
/// enabled.
pub(crate) fn package_args(packages: &[PackageSpec], enabled: &[String]) -> Vec<String> {
    packages
        .iter()
        .filter(|pkg| match &pkg.optional {
            Some(flag) => enabled.iter().any(|candidate| candidate == flag),
            None => true,
        })
        .map(|pkg| format!("{}={}", pkg.name, pkg.version))
        .collect()
}

fn switch_exists(output: &str, name: &str) -> bool {
    output.lines().map(str::trim).any(|line| line == name)
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    text
}

fn tail_of(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_estimate_is_monotonic_and_capped() {
        let mut last = 0.0;
        for lines in 0..400 {
            let fraction = fraction_for_lines(lines);
            assert!(fraction >= last, "regressed at {} lines", lines);
            assert!(fraction <= 0.95);
            last = fraction;
        }
        assert_eq!(fraction_for_lines(0), 0.0);
        assert_eq!(fraction_for_lines(1000), 0.95);
    }

    #[test]
    fn package_pins_respect_optional_flags() {
        let packages = vec![
            PackageSpec {
                name: "rocq-prover".into(),
                version: "9.0.0".into(),
                optional: None,
            },
            PackageSpec {
                name: "rocqide".into(),
                version: "9.0.0".into(),
                optional: Some("with_rocqide".into()),
            },
            PackageSpec {
                name: "vsrocq-language-server".into(),
                version: "2.2.6".into(),
                optional: Some("with_editor".into()),
            },
        ];

        let none = package_args(&packages, &[]);
        assert_eq!(none, vec!["rocq-prover=9.0.0"]);

        let editor = package_args(&packages, &["with_editor".to_string()]);
        assert_eq!(
            editor,
            vec!["rocq-prover=9.0.0", "vsrocq-language-server=2.2.6"]
        );

        let all = package_args(
            &packages,
            &["with_editor".to_string(), "with_rocqide".to_string()],
        );
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn switch_listing_match_is_exact() {
        let output = "default\nCP.2025.04.1~9.0\nCP.2025.04.1~9.0~beta1\n";
        assert!(switch_exists(output, "CP.2025.04.1~9.0"));
        assert!(switch_exists(output, "CP.2025.04.1~9.0~beta1"));
        assert!(!switch_exists(output, "CP.2025.04.1"));
    }

    #[test]
    fn error_tails_are_bounded() {
        let text = (0..40)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let tail = tail_of(&text, 20);
        assert_eq!(tail.lines().count(), 20);
        assert!(tail.ends_with("line 39"));
    }
}
