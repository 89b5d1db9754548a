use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::platform::{PlatformInfo, SearchRoots, BRAND_TOKENS};

/// Switch name prefixes that mark an opam environment as one of ours.
pub const DEFAULT_SWITCH_PREFIXES: [&str; 2] = ["CP.", "coq-"];

/// Binary names that prove a directory holds a toolchain install. The
/// legacy `coqc` stays so pre-rebrand installs still validate.
pub(crate) const TOOLCHAIN_BINARIES: [&str; 6] = [
    "rocq",
    "rocq.exe",
    "vsrocqtop",
    "vsrocqtop.exe",
    "coqc",
    "coqc.exe",
];

const UNINSTALL_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";

/// One detected installation, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installation {
    /// An opam switch named like a platform release.
    Switch(String),
    /// A macOS application bundle.
    Bundle(PathBuf),
    /// A plain directory holding toolchain binaries.
    Directory(PathBuf),
}

impl fmt::Display for Installation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Installation::Switch(name) => write!(f, "opam switch {}", name),
            Installation::Bundle(path) => write!(f, "{}", path.display()),
            Installation::Directory(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Merges every detection source for the host OS into a deduplicated,
/// discovery-ordered candidate list. Sources that fail (no opam, no
/// registry access) contribute nothing rather than erroring.
pub fn find_existing(
    platform: &PlatformInfo,
    roots: &SearchRoots,
    switch_prefixes: &[&str],
) -> Vec<Installation> {
    let mut found = Vec::new();

    match platform.os.as_str() {
        "linux" => {
            if let Some(output) = crate::opam::switch_list() {
                for name in matching_switches(&output, switch_prefixes) {
                    found.push(Installation::Switch(name));
                }
            }
        }
        "macos" => {
            for dir in scan_app_dirs(&roots.app_dirs) {
                found.push(Installation::Bundle(dir));
            }
            if let Ok(path) = which::which("rocq") {
                if let Some(bundle) = enclosing_bundle(&path) {
                    found.push(Installation::Bundle(bundle));
                }
            }
            for bin_dir in &roots.bin_dirs {
                if bin_dir.join("rocq").is_file() {
                    found.push(Installation::Directory(bin_dir.clone()));
                }
            }
        }
        "windows" => {
            for (parent, prefix) in &roots.versioned_roots {
                for dir in scan_prefixed_dirs(parent, prefix) {
                    if has_toolchain_install(&dir) {
                        found.push(Installation::Directory(dir));
                    }
                }
            }
            for location in registry_install_locations() {
                let dir = PathBuf::from(location);
                if has_toolchain_install(&dir) {
                    found.push(Installation::Directory(dir));
                }
            }
            for dir in &roots.install_dirs {
                if has_toolchain_install(dir) {
                    found.push(Installation::Directory(dir.clone()));
                }
            }
            if let Ok(path) = which::which("rocq") {
                if let Some(dir) = install_root_for_binary(&path) {
                    found.push(Installation::Directory(dir));
                }
            }
        }
        _ => {}
    }

    dedup(found, &platform.os)
}

/// Picks the candidate a run may reuse for the requested release: the exact
/// switch on Linux, the resolved install directory on Windows, the first
/// candidate on macOS.
pub fn reusable(
    candidates: &[Installation],
    os: &str,
    expected_switch: &str,
    expected_dir: &Path,
) -> Option<Installation> {
    match os {
        "linux" => candidates
            .iter()
            .find(|candidate| {
                matches!(candidate, Installation::Switch(name) if name == expected_switch)
            })
            .cloned(),
        "macos" => candidates.first().cloned(),
        "windows" => candidates
            .iter()
            .find(|candidate| match candidate {
                Installation::Directory(path) => paths_equal_fold(path, expected_dir),
                _ => false,
            })
            .cloned(),
        _ => None,
    }
}

/// Keeps switch names carrying one of the platform prefixes.
pub fn matching_switches(output: &str, prefixes: &[&str]) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| prefixes.iter().any(|prefix| line.starts_with(prefix)))
        .map(str::to_string)
        .collect()
}

/// True when `dir` holds a known toolchain binary at its root, under
/// `bin/`, or one directory down.
pub fn has_toolchain_install(dir: &Path) -> bool {
    if holds_binary(dir) || holds_binary(&dir.join("bin")) {
        return true;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .any(|subdir| holds_binary(&subdir) || holds_binary(&subdir.join("bin")))
}

fn holds_binary(dir: &Path) -> bool {
    TOOLCHAIN_BINARIES.iter().any(|name| dir.join(name).is_file())
}

/// Application-directory entries named `*.app` with a brand token, sorted
/// within each directory.
pub(crate) fn scan_app_dirs(app_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in app_dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        let mut matches: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                name.ends_with(".app") && BRAND_TOKENS.iter().any(|token| name.contains(token))
            })
            .map(|entry| entry.path())
            .collect();
        matches.sort();
        found.extend(matches);
    }
    found
}

/// Walks up from a binary looking for the `.app` bundle that contains it.
fn enclosing_bundle(path: &Path) -> Option<PathBuf> {
    let mut current = path.parent();
    for _ in 0..6 {
        let dir = current?;
        if dir.extension().is_some_and(|ext| ext == "app") {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

fn scan_prefixed_dirs(parent: &Path, prefix: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    found.sort();
    found
}

/// A binary found on PATH usually sits in `<root>\bin`, so the grandparent
/// is tried before the parent.
fn install_root_for_binary(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    if let Some(grandparent) = parent.parent() {
        if has_toolchain_install(grandparent) {
            return Some(grandparent.to_path_buf());
        }
    }
    if has_toolchain_install(parent) {
        return Some(parent.to_path_buf());
    }
    None
}

fn registry_install_locations() -> Vec<String> {
    let mut found = Vec::new();
    for hive in ["HKLM", "HKCU"] {
        let output = Command::new("reg")
            .args(["query", &format!(r"{}\{}", hive, UNINSTALL_KEY), "/s"])
            .output();
        if let Ok(output) = output {
            if output.status.success() {
                let text = String::from_utf8_lossy(&output.stdout);
                found.extend(install_locations_from_reg(&text, &BRAND_TOKENS));
            }
        }
    }
    found
}

/// Pulls `InstallLocation` values out of `reg query /s` output for
/// uninstall entries whose `DisplayName` carries one of `tokens`.
pub fn install_locations_from_reg(output: &str, tokens: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    let mut display_name = String::new();
    let mut install_location = String::new();

    let mut flush = |display_name: &mut String, install_location: &mut String| {
        let name = display_name.to_lowercase();
        if !install_location.is_empty() && tokens.iter().any(|token| name.contains(token)) {
            found.push(install_location.clone());
        }
        display_name.clear();
        install_location.clear();
    };

    for line in output.lines() {
        if line.starts_with("HKEY_") {
            flush(&mut display_name, &mut install_location);
            continue;
        }
        let trimmed = line.trim();
        if let Some(value) = reg_value(trimmed, "DisplayName") {
            display_name = value.to_string();
        } else if let Some(value) = reg_value(trimmed, "InstallLocation") {
            install_location = value.to_string();
        }
    }
    flush(&mut display_name, &mut install_location);
    found
}

fn reg_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.trim_start();
    for reg_type in ["REG_EXPAND_SZ", "REG_SZ"] {
        if let Some(value) = rest.strip_prefix(reg_type) {
            return Some(value.trim());
        }
    }
    None
}

/// Order-preserving dedup; path keys fold case on Windows.
fn dedup(found: Vec<Installation>, os: &str) -> Vec<Installation> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for item in found {
        let key = match &item {
            Installation::Switch(name) => format!("switch:{}", name),
            Installation::Bundle(path) | Installation::Directory(path) => {
                let text = path.to_string_lossy();
                if os == "windows" {
                    text.to_lowercase()
                } else {
                    text.into_owned()
                }
            }
        };
        if seen.insert(key) {
            unique.push(item);
        }
    }
    unique
}

fn paths_equal_fold(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
