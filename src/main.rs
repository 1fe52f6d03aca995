// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! `lsp-tagml` command-line entry point.
//!
//! Stands in for the editor binding: provisions the language server artifact,
//! reports readiness, and prints the launch command once the jar is verified.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use lsp_tagml::cli::{self, ColorConfig};
use lsp_tagml::config::Settings;
use lsp_tagml::{HttpFetcher, Notifier, ProvisionState, Provisioner, verify};

/// Command-line arguments for lsp-tagml.
#[derive(Parser, Debug)]
#[command(name = "lsp-tagml")]
#[command(about = "Provision and verify the TAGML language server")]
#[command(version = env!("LSP_TAGML_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    nocolor: bool,
}

/// Subcommands supported by lsp-tagml.
#[derive(Subcommand, Debug)]
enum Command {
    /// Download and verify the language server if needed, then print its path.
    Setup,

    /// Report whether the cached language server is valid (never downloads).
    Status,

    /// Print where the language server artifact is stored.
    Path,

    /// Print the command that launches the language server.
    /// Fails if the artifact is not installed and verified.
    Command,

    /// Check the Java runtime and the cached artifact.
    Doctor,
}

/// Entry point for the lsp-tagml binary.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.command {
        Command::Setup => "lsp_tagml=info",
        _ => "lsp_tagml=warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(args.config.clone())?;
    let colors = ColorConfig::new(args.nocolor);

    match args.command {
        Command::Setup => run_setup(&settings, &colors).await,
        Command::Status => run_status(&settings, &colors),
        Command::Path => run_path(&settings),
        Command::Command => run_command(&settings),
        Command::Doctor => run_doctor(&settings, &colors),
    }
}

/// Provisions the artifact and waits for the outcome.
///
/// # Errors
///
/// Returns an error if the descriptor is malformed or provisioning fails.
async fn run_setup(settings: &Settings, colors: &ColorConfig) -> Result<()> {
    let descriptor = settings.descriptor()?;
    let fetcher = Arc::new(HttpFetcher::new(settings.fetch_timeout())?);
    let notifier = Notifier::new();
    let mut events = notifier.subscribe();

    let provisioner = Provisioner::new(
        descriptor,
        settings.layout(),
        fetcher,
        notifier,
        tokio::runtime::Handle::current(),
    );

    let render_colors = colors.clone();
    let renderer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(text) = cli::notification_text(&event.kind) {
                        eprintln!("{}", render_colors.dim(&text));
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    // The cache check hashes the jar; keep it off the async workers.
    tokio::task::block_in_place(|| provisioner.setup());

    let state = tokio::select! {
        state = provisioner.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", colors.yellow("Interrupted, cancelling download"));
            provisioner.shutdown().await;
            provisioner.state()
        }
    };

    // Dropping the last notifier closes the channel once the renderer drains it.
    drop(provisioner);
    let _ = renderer.await;

    match state {
        ProvisionState::Ready { binary_path } => {
            println!("{}", binary_path.display());
            Ok(())
        }
        ProvisionState::Failed { reason } => bail!("{reason}"),
        other => bail!("provisioning did not finish (state: {})", other.name()),
    }
}

/// Reports whether the cached artifact verifies.
///
/// # Errors
///
/// Returns an error if the descriptor is malformed.
fn run_status(settings: &Settings, colors: &ColorConfig) -> Result<()> {
    let descriptor = settings.descriptor()?;
    let path = settings.layout().artifact_dir().join(descriptor.file_name());

    println!("{} {}", colors.bold("Version:"), descriptor.version());
    println!("{} {}", colors.bold("Path:   "), path.display());

    let status = if verify::matches(&path, descriptor.expected_digest()) {
        colors.green("ready")
    } else if path.exists() {
        colors.red("invalid (digest mismatch)")
    } else {
        colors.yellow("not downloaded")
    };
    println!("{} {}", colors.bold("Status: "), status);
    Ok(())
}

/// Prints the artifact location, valid or not.
///
/// # Errors
///
/// Returns an error if the descriptor is malformed.
fn run_path(settings: &Settings) -> Result<()> {
    let descriptor = settings.descriptor()?;
    let path = settings.layout().artifact_dir().join(descriptor.file_name());
    println!("{}", path.display());
    Ok(())
}

/// Prints `java -jar <artifact>` once the artifact verifies.
///
/// # Errors
///
/// Returns an error if the descriptor is malformed or the artifact is not ready.
fn run_command(settings: &Settings) -> Result<()> {
    let descriptor = settings.descriptor()?;
    let path = settings.layout().artifact_dir().join(descriptor.file_name());

    if !verify::matches(&path, descriptor.expected_digest()) {
        bail!("Language server binary not yet downloaded. Run `lsp-tagml setup` first.");
    }

    println!("java -jar {}", path.display());
    Ok(())
}

/// Checks the Java runtime and the cached artifact.
///
/// # Errors
///
/// Returns an error if the descriptor is malformed.
fn run_doctor(settings: &Settings, colors: &ColorConfig) -> Result<()> {
    println!("lsp-tagml {}", env!("LSP_TAGML_VERSION"));
    println!();

    let descriptor = settings.descriptor()?;
    let layout = settings.layout();
    let path = layout.artifact_dir().join(descriptor.file_name());

    println!("{} {}", colors.bold("Artifact:"), descriptor.url());
    println!("{} {}", colors.bold("Storage: "), layout.artifact_dir().display());
    println!();

    match cli::find_on_path("java") {
        Some(java) => println!(
            "  {:<10}{}",
            "java",
            colors.green(&format!("✓ {}", java.display()))
        ),
        None => println!(
            "  {:<10}{}",
            "java",
            colors.red("✗ not found on PATH; install a Java runtime")
        ),
    }

    let artifact = if verify::matches(&path, descriptor.expected_digest()) {
        colors.green(&format!("✓ {}", descriptor.file_name()))
    } else if path.exists() {
        colors.red("✗ digest mismatch; run `lsp-tagml setup`")
    } else {
        colors.yellow("- not downloaded; run `lsp-tagml setup`")
    };
    println!("  {:<10}{}", "server", artifact);

    if let Some(legacy) = layout.legacy_dir().filter(|dir| dir.is_dir()) {
        println!(
            "  {:<10}{}",
            "legacy",
            colors.yellow(&format!(
                "- {} will be migrated on next setup",
                legacy.display()
            ))
        );
    }

    Ok(())
}
