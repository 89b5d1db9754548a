use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::names::ProductNames;
use crate::platform::SearchRoots;

/// Directory levels searched below an install root or bundle.
const MAX_SEARCH_DEPTH: usize = 6;

/// Finds the language server for an installed toolchain. `root` narrows the
/// search to one installation; the shared roots cover everything else.
/// Returns `NotFound` when every source comes up empty.
pub fn language_server(
    root: Option<&Path>,
    names: &ProductNames,
    os: &str,
    roots: &SearchRoots,
) -> Result<PathBuf> {
    let candidates = binary_names(names.language_server, os);

    if let Some(root) = root {
        for name in &candidates {
            for direct in [root.join("bin").join(name), root.join(name)] {
                if is_executable(&direct, os) {
                    return Ok(direct);
                }
            }
        }
        if let Some(found) = walk_for_binary(&walk_root(root), &candidates, os) {
            return Ok(found);
        }
    }

    if let Ok(found) = which::which(names.language_server) {
        return Ok(found);
    }

    for bin_dir in &roots.bin_dirs {
        for name in &candidates {
            let candidate = bin_dir.join(name);
            if is_executable(&candidate, os) {
                return Ok(candidate);
            }
        }
    }

    for bundle in crate::detect::scan_app_dirs(&roots.app_dirs) {
        if let Some(found) = walk_for_binary(&walk_root(&bundle), &candidates, os) {
            return Ok(found);
        }
    }

    Err(Error::NotFound(format!(
        "{} not found; is the platform installed?",
        names.language_server
    )))
}

/// Bundles keep binaries under `Contents`; plain roots are walked as-is.
fn walk_root(root: &Path) -> PathBuf {
    let contents = root.join("Contents");
    if contents.is_dir() {
        contents
    } else {
        root.to_path_buf()
    }
}

fn walk_for_binary(root: &Path, names: &[String], os: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .max_depth(MAX_SEARCH_DEPTH)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            entry.file_type().is_file()
                && names
                    .iter()
                    .any(|name| entry.file_name() == OsStr::new(name))
                && is_executable(entry.path(), os)
        })
        .map(|entry| entry.into_path())
}

fn binary_names(base: &str, os: &str) -> Vec<String> {
    if os == "windows" {
        vec![base.to_string(), format!("{}.exe", base)]
    } else {
        vec![base.to_string()]
    }
}

fn is_executable(path: &Path, os: &str) -> bool {
    if !path.is_file() {
        return false;
    }
    if os == "windows" {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(path) {
            Ok(meta) => meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names() -> ProductNames {
        ProductNames::for_version("9.0.0")
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn finds_direct_bin_candidate() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();
        let server = root.path().join("bin/vsrocqtop");
        fs::write(&server, b"#!/bin/sh\n").unwrap();
        make_executable(&server);

        let found =
            language_server(Some(root.path()), &names(), "linux", &SearchRoots::default()).unwrap();
        assert_eq!(found, server);
    }

    #[cfg(unix)]
    #[test]
    fn walks_bundle_contents() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("Contents/Resources/vsrocq/bin");
        fs::create_dir_all(&nested).unwrap();
        let server = nested.join("vsrocqtop");
        fs::write(&server, b"").unwrap();
        make_executable(&server);

        let found =
            language_server(Some(root.path()), &names(), "macos", &SearchRoots::default()).unwrap();
        assert_eq!(found, server);
    }

    #[cfg(unix)]
    #[test]
    fn skips_non_executable_files() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin/vsrocqtop"), b"").unwrap();

        let err = language_server(Some(root.path()), &names(), "linux", &SearchRoots::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn search_depth_is_bounded() {
        let root = tempfile::tempdir().unwrap();
        let deep = root.path().join("a/b/c/d/e/f/g");
        fs::create_dir_all(&deep).unwrap();
        let server = deep.join("vsrocqtop");
        fs::write(&server, b"").unwrap();
        make_executable(&server);

        let result = language_server(Some(root.path()), &names(), "linux", &SearchRoots::default());
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn legacy_toolchains_search_for_vscoqtop() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();
        let server = root.path().join("bin/vscoqtop");
        fs::write(&server, b"").unwrap();
        make_executable(&server);

        let legacy = ProductNames::for_version("8.19.2");
        let found =
            language_server(Some(root.path()), &legacy, "linux", &SearchRoots::default()).unwrap();
        assert_eq!(found, server);
    }
}
