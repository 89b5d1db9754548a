mod cli;
mod detect;
mod dmg;
mod doctor;
mod download;
mod elevate;
mod error;
mod install;
mod locate;
mod logger;
mod manifest;
mod names;
mod opam;
mod pipeline;
mod platform;
mod releases;
mod vscode;
mod workspace;

use anyhow::{anyhow, Result};
use clap::Parser;
use cli::{Cli, Commands};
use indicatif::{ProgressBar, ProgressStyle};
use install::InstallOptions;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    match cli.command {
        Commands::Version => {
            println!("rocqup v{}", env!("CARGO_PKG_VERSION"));
        }

        Commands::Detect => {
            run_detect();
        }

        Commands::Doctor => {
            run_doctor()?;
        }

        Commands::Releases => {
            run_releases().await?;
        }

        Commands::Manifest { format, manifest } => {
            run_manifest(&format, manifest.as_deref())?;
        }

        Commands::Install {
            manifest,
            release,
            force,
            recreate,
            reinstall,
            with_ide,
            no_editor,
            snapshot,
            target_dir,
            workspace,
        } => {
            let options = InstallOptions {
                force,
                recreate,
                reinstall,
                with_ide,
                editor_integration: !no_editor,
                snapshot,
                target_dir,
            };
            run_install(manifest, release, options, workspace, cli.quiet).await?;
        }
    }

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

async fn run_install(
    manifest_path: Option<PathBuf>,
    release: Option<String>,
    options: InstallOptions,
    workspace_override: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let log = logger::RunLog::create()?;
    log.log(&format!("rocqup v{}", env!("CARGO_PKG_VERSION")));

    let platform = platform::get_system_info();
    let roots = platform::SearchRoots::for_os(&platform.os);

    let manifest = match (&manifest_path, &release) {
        (Some(path), _) => manifest::Manifest::load(path, &platform)?,
        (None, Some(tag)) => releases::manifest_for_tag(tag, &platform).await?,
        (None, None) => manifest::Manifest::embedded(&platform)?,
    };
    tracing::info!(
        "Installing release {} (toolchain {}) on {}/{}",
        manifest.release_id,
        manifest.toolchain_version,
        platform.os,
        platform.arch
    );
    log.log(&format!(
        "release {} toolchain {} on {}/{}",
        manifest.release_id, manifest.toolchain_version, platform.os, platform.arch
    ));

    let reuse = find_reusable(&manifest, &platform, &roots, &options);
    let workspace_dir = match workspace_override {
        Some(dir) => dir,
        None => workspace::default_dir()?,
    };

    let pb = step_bar(quiet);
    let mut last_line = String::new();
    let result = pipeline::run(
        pipeline::RunConfig {
            manifest: &manifest,
            platform: &platform,
            roots: &roots,
            options,
            reuse,
            workspace_dir,
            log: &log,
        },
        |step, label, fraction| {
            pb.set_position((step as u64 - 1) * 100 + (fraction.clamp(0.0, 1.0) * 100.0) as u64);
            pb.set_message(format!("[{}/{}] {}", step, pipeline::TOTAL_STEPS, label));
            let line = format!("step {}/{}: {}", step, pipeline::TOTAL_STEPS, label);
            if line != last_line {
                tracing::info!("{}", line);
                log.log(&line);
                last_line = line;
            }
        },
    )
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            pb.abandon();
            log.log(&format!("ERROR: {}", err));
            eprintln!("Run log: {}", log.path().display());
            return Err(err.into());
        }
    };
    pb.finish_and_clear();

    println!("Installed: {}", outcome.installed);
    if let Some(server) = &outcome.language_server {
        println!("Language server: {}", server.display());
    }
    if !outcome.editor_found {
        println!("VSCode was not configured; run the installer again once it is installed.");
    }
    println!("Run log: {}", log.path().display());
    Ok(())
}

/// Picks an installation this run may reuse, honoring --reinstall.
fn find_reusable(
    manifest: &manifest::Manifest,
    platform: &platform::PlatformInfo,
    roots: &platform::SearchRoots,
    options: &InstallOptions,
) -> Option<detect::Installation> {
    if options.reinstall {
        return None;
    }
    let candidates = detect::find_existing(platform, roots, &detect::DEFAULT_SWITCH_PREFIXES);
    if candidates.is_empty() {
        return None;
    }
    let prefix = match manifest.asset_for(platform) {
        Ok(manifest::Asset::SourcePackageManager(spec)) => spec.switch_prefix.clone(),
        _ => "CP".to_string(),
    };
    let expected_switch = names::switch_name(
        &prefix,
        &manifest.release_id,
        &manifest.toolchain_version,
        options.snapshot.as_deref(),
    );
    let expected_dir = options.install_dir(manifest);
    detect::reusable(&candidates, &platform.os, &expected_switch, &expected_dir)
}

fn step_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(pipeline::TOTAL_STEPS as u64 * 100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

fn run_detect() {
    let platform = platform::get_system_info();
    let roots = platform::SearchRoots::for_os(&platform.os);
    let found = detect::find_existing(&platform, &roots, &detect::DEFAULT_SWITCH_PREFIXES);

    println!("--- Rocq Platform Installations ---");
    if found.is_empty() {
        println!("  None found.");
        return;
    }
    for installation in &found {
        println!("  - {}", installation);
    }
    println!("-----------------------------------");
}

fn run_doctor() -> Result<()> {
    let log = logger::RunLog::create()?;
    let platform = platform::get_system_info();
    let roots = platform::SearchRoots::for_os(&platform.os);
    doctor::run(&roots, &log);
    println!("\nRun log: {}", log.path().display());
    Ok(())
}

async fn run_releases() -> Result<()> {
    let releases = releases::fetch_releases().await?;

    println!("--- Rocq Platform Releases ---");
    if releases.is_empty() {
        println!("  None found.");
        return Ok(());
    }
    for release in &releases {
        match &release.toolchain_version {
            Some(version) => {
                let brand = if names::is_pre_rebrand(version) {
                    "Coq"
                } else {
                    "Rocq"
                };
                println!("  {} ({} {})", release.tag, brand, version);
            }
            None => println!("  {}", release.tag),
        }
    }
    println!("------------------------------");
    Ok(())
}

fn run_manifest(format: &str, path: Option<&Path>) -> Result<()> {
    let platform = platform::get_system_info();
    let manifest = match path {
        Some(path) => manifest::Manifest::load(path, &platform)?,
        None => manifest::Manifest::embedded(&platform)?,
    };
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&manifest)?),
        "yaml" => print!("{}", serde_yaml::to_string(&manifest)?),
        other => return Err(anyhow!("unsupported format '{}'; use json or yaml", other)),
    }
    Ok(())
}
