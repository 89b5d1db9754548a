use std::path::{Path, PathBuf};

use crate::detect::Installation;
use crate::dmg;
use crate::elevate;
use crate::error::{Error, Result};
use crate::logger::RunLog;
use crate::manifest::{Asset, Manifest};
use crate::opam;
use crate::platform::SearchRoots;

/// Caller-facing knobs for one run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Overwrite an existing bundle or installation.
    pub force: bool,
    /// Tear down and rebuild an existing switch.
    pub recreate: bool,
    /// Ignore detected installations and install fresh.
    pub reinstall: bool,
    /// Build the graphical IDE package as well.
    pub with_ide: bool,
    /// Wire up the editor and its language server. On by default.
    pub editor_integration: bool,
    /// Suffix distinguishing a snapshot environment from the release one.
    pub snapshot: Option<String>,
    /// Explicit install directory for the elevated installer.
    pub target_dir: Option<PathBuf>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        InstallOptions {
            force: false,
            recreate: false,
            reinstall: false,
            with_ide: false,
            editor_integration: true,
            snapshot: None,
            target_dir: None,
        }
    }
}

impl InstallOptions {
    /// Manifest optional-flags enabled by this configuration.
    pub fn enabled_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.editor_integration {
            flags.push("with_editor".to_string());
        }
        if self.with_ide {
            flags.push("with_rocqide".to_string());
        }
        flags
    }

    /// Resolved install directory for the elevated strategy.
    pub fn install_dir(&self, manifest: &Manifest) -> PathBuf {
        self.target_dir
            .clone()
            .unwrap_or_else(|| elevate::default_install_dir(manifest))
    }
}

/// Runs the strategy selected by the asset tag. Downloadable assets get
/// their verified artifact; the package-manager strategy builds from the
/// pinned repository instead.
pub fn run_strategy(
    asset: &Asset,
    artifact: Option<&Path>,
    manifest: &Manifest,
    options: &InstallOptions,
    roots: &SearchRoots,
    log: &RunLog,
    on_progress: &mut dyn FnMut(f64),
) -> Result<Installation> {
    match asset {
        Asset::DiskImage(_) => {
            let image = artifact.ok_or_else(|| {
                Error::Install("no artifact staged for the disk image".to_string())
            })?;
            let bundle = dmg::install_from_image(image, options.force, roots, log, on_progress)?;
            Ok(Installation::Bundle(bundle))
        }
        Asset::SelfExtractingInstaller(_) => {
            let installer = artifact.ok_or_else(|| {
                Error::Install("no artifact staged for the installer".to_string())
            })?;
            let install_dir = options.install_dir(manifest);
            elevate::run_elevated_installer(installer, &install_dir, log)?;
            Ok(Installation::Directory(install_dir))
        }
        Asset::SourcePackageManager(spec) => {
            let outcome = opam::install_switch(spec, manifest, options, log, on_progress)?;
            Ok(Installation::Switch(outcome.name))
        }
    }
}

/// Step label shown while a strategy runs.
pub fn strategy_label(asset: &Asset) -> &'static str {
    match asset {
        Asset::DiskImage(_) => "Installing Rocq Platform...",
        Asset::SelfExtractingInstaller(_) => {
            "Installing Rocq Platform (follow the installer window)..."
        }
        Asset::SourcePackageManager(_) => "Building the Rocq toolchain (this can take a while)...",
    }
}
