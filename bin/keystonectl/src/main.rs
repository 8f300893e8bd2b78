//! ---
//! ks_section: "06-operator-cli"
//! ks_subsection: "binary"
//! ks_type: "source"
//! ks_scope: "code"
//! ks_description: "Operator CLI for inspecting and exercising Keystone runtimes."
//! ks_version: "v0.0.0-prealpha"
//! ks_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keystone_common::{init_tracing, RuntimeConfig};

mod config;
mod demo;

#[derive(Debug, Parser)]
#[command(author, version, about = "Keystone runtime operator utility", long_about = None)]
struct Cli {
    /// Runtime configuration file; the defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE", env = "KEYSTONE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Validate or generate runtime configuration")]
    Config(config::ConfigCommand),
    #[command(about = "Run a scripted registry, signal and timeline scenario")]
    Demo(demo::DemoArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime_config = match &cli.config {
        Some(path) => {
            // the global runtime reads its configuration from the environment
            std::env::set_var(RuntimeConfig::ENV_CONFIG_PATH, path);
            RuntimeConfig::from_path(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?
        }
        None => RuntimeConfig::default(),
    };
    init_tracing("keystonectl", &runtime_config.logging)?;

    match cli.command {
        Commands::Config(cmd) => config::run(cmd),
        Commands::Demo(args) => demo::run(args),
    }
}
