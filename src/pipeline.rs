//! The seven-step provisioning run.
//!
//! Every run walks the same steps in the same order so callers can render
//! stable progress no matter which install strategy is active:
//!
//!   1. acquire the artifact
//!   2. verify its checksum
//!   3. run the install strategy
//!   4. locate the language server
//!   5. detect and configure the editor
//!   6. create the workspace
//!   7. finalize the editor configuration
//!
//! Steps that do not apply to a run still report exactly once, with the
//! fixed `skipped` label and a full fraction.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::detect::Installation;
use crate::download;
use crate::error::Result;
use crate::install::{self, InstallOptions};
use crate::locate;
use crate::logger::RunLog;
use crate::manifest::{Asset, Manifest};
use crate::names::ProductNames;
use crate::opam;
use crate::platform::{PlatformInfo, SearchRoots};
use crate::vscode;
use crate::workspace;

/// Steps in one full run.
pub const TOTAL_STEPS: u32 = 7;

/// Label reported by steps that do not apply to the current run.
pub const SKIPPED: &str = "skipped";

/// Everything one run needs. Borrowed pieces outlive the run.
pub struct RunConfig<'a> {
    pub manifest: &'a Manifest,
    pub platform: &'a PlatformInfo,
    pub roots: &'a SearchRoots,
    pub options: InstallOptions,
    /// Detected installation to reuse instead of installing a new one.
    pub reuse: Option<Installation>,
    pub workspace_dir: PathBuf,
    pub log: &'a RunLog,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub installed: Installation,
    pub language_server: Option<PathBuf>,
    pub editor_found: bool,
}

/// Runs the pipeline. `on_step` receives the step number (1-based), a
/// display label and a completion fraction in `0.0..=1.0`. Steps report in
/// order and a step may report any number of times before the next starts.
///
/// A missing language server or editor degrades the run rather than
/// failing it; everything up to and including the install itself aborts on
/// error.
pub async fn run(
    mut cfg: RunConfig<'_>,
    mut on_step: impl FnMut(u32, &str, f64),
) -> Result<RunOutcome> {
    let asset = cfg.manifest.asset_for(cfg.platform)?;
    let names = ProductNames::for_version(&cfg.manifest.toolchain_version);

    let installed = match cfg.reuse.take() {
        Some(existing) => {
            tracing::info!("Reusing {}", existing);
            cfg.log.log(&format!("reusing {}", existing));
            on_step(1, SKIPPED, 1.0);
            on_step(2, SKIPPED, 1.0);
            on_step(3, SKIPPED, 1.0);
            existing
        }
        None => install_toolchain(&cfg, asset, &mut on_step).await?,
    };

    // The language server decides how much editor wiring is possible.
    let locating = format!("Locating {}...", names.language_server);
    on_step(4, &locating, 0.0);
    let language_server = match locate_server(&installed, &names, cfg.platform, cfg.roots) {
        Ok(path) => {
            cfg.log.log(&format!("language server: {}", path.display()));
            on_step(4, &locating, 1.0);
            Some(path)
        }
        Err(err) if err.is_not_found() => {
            tracing::warn!("{}", err);
            cfg.log.log(&format!("WARN: {}", err));
            on_step(4, "Language server not found.", 1.0);
            None
        }
        Err(err) => return Err(err),
    };

    if !cfg.options.editor_integration {
        cfg.log.log("editor integration disabled");
        on_step(5, SKIPPED, 1.0);
        on_step(6, SKIPPED, 1.0);
        on_step(7, SKIPPED, 1.0);
        return Ok(RunOutcome {
            installed,
            language_server,
            editor_found: false,
        });
    }

    on_step(5, "Checking for VSCode...", 0.0);
    let code = match vscode::find_code(cfg.roots) {
        Ok(path) => path,
        Err(err) if err.is_not_found() => {
            tracing::warn!("VSCode not found; skipping editor setup");
            cfg.log.log("VSCode not found; skipping editor setup");
            on_step(5, "VSCode not found.", 1.0);
            on_step(6, SKIPPED, 1.0);
            on_step(7, SKIPPED, 1.0);
            return Ok(RunOutcome {
                installed,
                language_server,
                editor_found: false,
            });
        }
        Err(err) => return Err(err),
    };
    cfg.log.log(&format!("editor: {}", code.display()));
    on_step(5, "Installing the VSCode extension...", 0.5);
    if let Err(err) = vscode::install_extension(&code, names.extension_id, cfg.log) {
        tracing::warn!("Extension install failed: {}", err);
        cfg.log.log(&format!("WARN: extension install failed: {}", err));
    }
    on_step(5, "Installing the VSCode extension...", 1.0);

    on_step(6, "Creating the workspace...", 0.0);
    workspace::create(&cfg.workspace_dir, cfg.log)?;
    if let Installation::Switch(name) = &installed {
        workspace::write_activation_scripts(&cfg.workspace_dir, name, cfg.log)?;
    }
    on_step(6, "Creating the workspace...", 1.0);

    on_step(7, "Finalizing editor configuration...", 0.0);
    if let Some(server) = &language_server {
        workspace::write_editor_settings(&cfg.workspace_dir, names.settings_key, server, cfg.log)?;
    }
    if let Err(err) = vscode::open_workspace(&code, &cfg.workspace_dir) {
        tracing::warn!("Could not open the workspace: {}", err);
        cfg.log.log(&format!("WARN: could not open the workspace: {}", err));
    }
    on_step(7, "Done!", 1.0);

    Ok(RunOutcome {
        installed,
        language_server,
        editor_found: true,
    })
}

/// Steps 1-3 for a fresh install. Downloadable assets are staged in a
/// temporary directory that lives until the strategy has consumed them.
async fn install_toolchain(
    cfg: &RunConfig<'_>,
    asset: &Asset,
    on_step: &mut impl FnMut(u32, &str, f64),
) -> Result<Installation> {
    let staged = match asset.artifact() {
        Some(artifact) => {
            let staging = TempDir::new()?;
            let label = "Downloading the Rocq Platform...";
            on_step(1, label, 0.0);
            let path = download::download(&artifact.url, staging.path(), |done, total| {
                if let Some(total) = total.filter(|len| *len > 0) {
                    on_step(1, label, done as f64 / total as f64);
                }
            })
            .await?;
            cfg.log.log(&format!("downloaded {}", path.display()));

            if artifact.sha256.trim().is_empty() {
                cfg.log.log("no published digest; skipping verification");
                on_step(2, SKIPPED, 1.0);
            } else {
                on_step(2, "Verifying checksum...", 0.0);
                download::verify_sha256(&path, &artifact.sha256)?;
                cfg.log.log("checksum verified");
                on_step(2, "Verifying checksum...", 1.0);
            }
            Some((staging, path))
        }
        None => {
            // Package-manager builds have nothing to fetch or verify.
            on_step(1, SKIPPED, 1.0);
            on_step(2, SKIPPED, 1.0);
            None
        }
    };

    let label = install::strategy_label(asset);
    on_step(3, label, 0.0);
    let installed = install::run_strategy(
        asset,
        staged.as_ref().map(|(_, path)| path.as_path()),
        cfg.manifest,
        &cfg.options,
        cfg.roots,
        cfg.log,
        &mut |fraction| on_step(3, label, fraction),
    )?;
    on_step(3, label, 1.0);
    cfg.log.log(&format!("installed {}", installed));
    Ok(installed)
}

/// An opam switch answers through its bin directory first; bundle and
/// directory installs are searched in place.
fn locate_server(
    installed: &Installation,
    names: &ProductNames,
    platform: &PlatformInfo,
    roots: &SearchRoots,
) -> Result<PathBuf> {
    match installed {
        Installation::Switch(name) => {
            match opam::switch_bin_dir(name) {
                Ok(bin_dir) => {
                    let direct = bin_dir.join(names.language_server);
                    if direct.is_file() {
                        return Ok(direct);
                    }
                }
                Err(err) => tracing::debug!("switch bin lookup failed: {}", err),
            }
            locate::language_server(None, names, &platform.os, roots)
        }
        Installation::Bundle(root) | Installation::Directory(root) => {
            locate::language_server(Some(root), names, &platform.os, roots)
        }
    }
}
