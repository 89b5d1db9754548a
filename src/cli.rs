use std::path::PathBuf;

use clap::{Parser, Subcommand};

fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // If there's a git tag at HEAD, use just the tag (release build)
    if let Some(tag) = option_env!("ROCQUP_GIT_TAG") {
        return tag;
    }

    // Not on a tag - include commit hash and branch (dev build)
    let commit = option_env!("ROCQUP_GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("ROCQUP_GIT_BRANCH").unwrap_or("unknown");

    // Return a static string by leaking the formatted string
    // This is safe because it only happens once at startup
    let version = format!("v{}-{} ({})", BASE_VERSION, commit, branch);
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "rocqup")]
#[command(about = "Installs the Rocq Platform and wires up VSCode")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the pinned Rocq Platform toolchain
    #[command(
        after_help = "Examples:\n  rocqup install\n  rocqup install --release 2025.04.1\n  rocqup install --manifest ./latest.json --force\n\nTo see help for this command, use 'rocqup help install'."
    )]
    Install {
        /// Manifest file to install from instead of the embedded one
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Release tag to install from instead of the embedded manifest
        #[arg(long, conflicts_with = "manifest")]
        release: Option<String>,

        /// Overwrite an existing application bundle
        #[arg(long)]
        force: bool,

        /// Tear down and rebuild an existing switch
        #[arg(long)]
        recreate: bool,

        /// Install even when a matching installation already exists
        #[arg(long)]
        reinstall: bool,

        /// Also build the RocqIDE package
        #[arg(long)]
        with_ide: bool,

        /// Skip VSCode detection and the editor wiring
        #[arg(long)]
        no_editor: bool,

        /// Label for a snapshot switch alongside the release one
        #[arg(long)]
        snapshot: Option<String>,

        /// Install directory for the Windows installer
        #[arg(long)]
        target_dir: Option<PathBuf>,

        /// Workspace directory (defaults to ~/rocq-workspace)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// List existing Rocq Platform installations
    Detect,

    /// Diagnose the environment without changing it
    Doctor,

    /// List installable releases
    Releases,

    /// Print the manifest that would drive an install
    Manifest {
        /// Output format (json, yaml)
        #[arg(long, default_value = "json")]
        format: String,

        /// Manifest file to print instead of the embedded one
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Show the current version
    Version,
}
