use std::fs;
use std::path::{Path, PathBuf};

/// Normalized host descriptor used to select a manifest asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

/// Product brand names, current and pre-rebrand, lowercased.
pub const BRAND_TOKENS: [&str; 2] = ["rocq", "coq"];

pub fn get_system_info() -> PlatformInfo {
    let os = std::env::consts::OS.to_string();
    let arch = std::env::consts::ARCH.to_string();

    // Manifest asset tables key architectures as x86_64/arm64.
    let normalized_arch = match arch.as_str() {
        "aarch64" => "arm64".to_string(),
        _ => arch,
    };

    PlatformInfo {
        os,
        arch: normalized_arch,
    }
}

/// Per-OS search table shared by the installation detector, the language
/// server locator and the editor probe. Tests inject their own roots.
#[derive(Debug, Clone, Default)]
pub struct SearchRoots {
    /// Application directories scanned for brand-named bundles.
    pub app_dirs: Vec<PathBuf>,
    /// Directories that may hold toolchain binaries directly.
    pub bin_dirs: Vec<PathBuf>,
    /// Fixed install directories probed as-is.
    pub install_dirs: Vec<PathBuf>,
    /// `(parent, name prefix)` pairs globbed for versioned install roots.
    pub versioned_roots: Vec<(PathBuf, String)>,
    /// Candidate locations for the editor CLI.
    pub editor_clis: Vec<PathBuf>,
}

impl SearchRoots {
    pub fn for_os(os: &str) -> Self {
        match os {
            "macos" => {
                let mut app_dirs = vec![PathBuf::from("/Applications")];
                if let Some(home) = dirs::home_dir() {
                    app_dirs.push(home.join("Applications"));
                }
                let editor_clis = app_dirs
                    .iter()
                    .map(|dir| dir.join("Visual Studio Code.app/Contents/Resources/app/bin/code"))
                    .chain([
                        PathBuf::from("/opt/homebrew/bin/code"),
                        PathBuf::from("/usr/local/bin/code"),
                    ])
                    .collect();
                SearchRoots {
                    app_dirs,
                    bin_dirs: vec![
                        PathBuf::from("/opt/homebrew/bin"),
                        PathBuf::from("/usr/local/bin"),
                    ],
                    editor_clis,
                    ..Default::default()
                }
            }
            "windows" => SearchRoots {
                install_dirs: vec![
                    PathBuf::from(r"C:\Rocq"),
                    PathBuf::from(r"C:\Program Files\Rocq"),
                    PathBuf::from(r"C:\Program Files (x86)\Rocq"),
                ],
                versioned_roots: vec![(PathBuf::from(r"C:\"), "Rocq-platform~".to_string())],
                editor_clis: vec![
                    PathBuf::from(r"C:\Program Files\Microsoft VS Code\bin\code.cmd"),
                    PathBuf::from(r"C:\Program Files (x86)\Microsoft VS Code\bin\code.cmd"),
                ],
                ..Default::default()
            },
            _ => SearchRoots {
                editor_clis: vec![
                    PathBuf::from("/usr/bin/code"),
                    PathBuf::from("/snap/bin/code"),
                    PathBuf::from("/usr/share/code/bin/code"),
                ],
                ..Default::default()
            },
        }
    }
}

/// Checks whether `dir` accepts new entries by creating and removing a probe
/// file. Decides between the system and per-user application roots.
pub fn dir_writable(dir: &Path) -> bool {
    let probe = dir.join(".rocq-write-test");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
