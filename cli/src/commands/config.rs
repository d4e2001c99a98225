// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use tether_agent_core::domain::agent_config::AgentConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./tether-config.yaml)
        #[arg(short, long, default_value = "./tether-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)).map(|_| ()),
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = AgentConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. TETHER_CONFIG_PATH: {}",
            std::env::var("TETHER_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./tether-config.yaml");
        println!("  4. ~/.tether/config.yaml");
        println!("  5. /etc/tether/config.yaml");
        println!();
    }

    if as_yaml {
        let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", yaml);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Agent:".bold());
    println!("  Name: {}", config.metadata.name);
    if spec.agent.id.is_empty() {
        println!("  ID: {}", "(not set)".yellow());
    } else {
        println!("  ID: {}", spec.agent.id);
    }
    println!("  Local mode: {}", spec.agent.local_mode);
    println!();

    println!("{}", "Control Plane:".bold());
    println!("  API: {}", spec.control_plane.api_addr);
    println!("  gRPC: {}", spec.control_plane.grpc_addr);
    if spec.control_plane.insecure {
        println!("  TLS: {}", "disabled".red());
    } else {
        println!("  TLS: enabled");
    }
    println!();

    println!("{}", "Streams:".bold());
    println!("  Reconnect interval: {:?}", spec.streams.reconnect_interval);
    println!("  Resync interval: {:?}", spec.streams.resync_interval);
    println!("  Event buffer: {}", spec.streams.event_channel_capacity);
    println!();

    println!("{}", "Diagnostics:".bold());
    println!(
        "  Metrics: {} samples, {:?} apart",
        spec.diagnostics.metrics_samples, spec.diagnostics.metrics_sample_interval
    );
    println!("  Collection budget: {:?}", spec.diagnostics.max_collection_duration);
    println!("  Max concurrent: {}", spec.diagnostics.max_concurrent_collections);
    println!();

    println!("{}", "Admin:".bold());
    println!("  Bind: {}", spec.admin.bind_address);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<AgentConfigManifest> {
    println!("Validating configuration...");

    let config = AgentConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(config)
}

fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
