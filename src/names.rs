//! Version-dependent product naming.
//!
//! The prover was rebranded from Coq to Rocq at major version 9. Binary
//! names, the editor extension and its settings key all changed with it,
//! so everything downstream asks this module instead of hardcoding names.

/// Major version at which the Coq-to-Rocq rename took effect.
pub const REBRAND_MAJOR: u64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductNames {
    pub toolchain_binary: &'static str,
    pub language_server: &'static str,
    pub extension_id: &'static str,
    pub settings_key: &'static str,
}

impl ProductNames {
    pub fn for_version(version: &str) -> ProductNames {
        if is_pre_rebrand(version) {
            ProductNames {
                toolchain_binary: "coqc",
                language_server: "vscoqtop",
                extension_id: "coq-community.vscoq",
                settings_key: "vscoq.path",
            }
        } else {
            ProductNames {
                toolchain_binary: "rocq",
                language_server: "vsrocqtop",
                extension_id: "rocq-prover.vsrocq",
                settings_key: "vsrocq.path",
            }
        }
    }
}

/// True for toolchains older than the rebrand. Unparseable majors are
/// treated as current.
pub fn is_pre_rebrand(version: &str) -> bool {
    major_of(version).is_some_and(|major| major < REBRAND_MAJOR)
}

fn major_of(version: &str) -> Option<u64> {
    if let Ok(parsed) = semver::Version::parse(version.trim()) {
        return Some(parsed.major);
    }
    // Release ids and some tags carry only two components.
    version.trim().split('.').next()?.parse().ok()
}

/// First two dot-separated components, so `9.0.1` becomes `9.0`. Inputs
/// with fewer components pass through unchanged.
pub fn major_minor(version: &str) -> String {
    let mut parts = version.trim().splitn(3, '.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{}.{}", major, minor),
        _ => version.trim().to_string(),
    }
}

/// Deterministic environment name for a platform release, e.g.
/// `CP.2025.04.1~9.0` or `CP.2025.04.1~9.0~beta1` for a snapshot build.
pub fn switch_name(
    prefix: &str,
    release_id: &str,
    toolchain_version: &str,
    snapshot: Option<&str>,
) -> String {
    let mut name = format!("{}.{}~{}", prefix, release_id, major_minor(toolchain_version));
    if let Some(snapshot) = snapshot {
        name.push('~');
        name.push_str(snapshot);
    }
    name
}
