//! deltawatch - hot reload sessions for running .NET apps.

mod app_model;
mod cli;
mod client;
mod config;
mod core;
mod logger;
mod session;
mod utils;
mod watch;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::DeltaConfig;
use std::sync::Arc;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let delta_config = Arc::new(DeltaConfig::load(&cli)?);
    if !delta_config.config_path.as_os_str().is_empty() {
        debug!("config"; "loaded {}", delta_config.config_path.display());
    }

    match &cli.command {
        Commands::Watch { .. } => cli::watch::run_watch(cli.graph(), delta_config),
        Commands::Topology { .. } => cli::topology::print_topology(cli.graph()),
    }
}
