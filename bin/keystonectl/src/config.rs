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
use clap::{Args, Subcommand};
use keystone_common::RuntimeConfig;
use keystone_logging::{log_runtime_event, LogContext, RuntimeEventOutcome};

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Check(cmd) => cmd.execute(),
        ConfigCommand::Default => {
            print!("{}", RuntimeConfig::default().to_toml()?);
            Ok(())
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate a configuration file, then print the effective values.
    #[command(name = "check")]
    Check(CheckCommand),
    /// Print the default configuration as TOML.
    #[command(name = "default")]
    Default,
}

#[derive(Debug, Args)]
pub struct CheckCommand {
    #[arg(value_name = "FILE")]
    path: PathBuf,
}

impl CheckCommand {
    fn execute(self) -> Result<()> {
        let ctx = LogContext::new().with_component("keystonectl");
        let config = match RuntimeConfig::from_path(&self.path) {
            Ok(config) => config,
            Err(err) => {
                log_runtime_event(
                    Some(&ctx),
                    "config_check",
                    &format!("{} rejected: {err:#}", self.path.display()),
                    RuntimeEventOutcome::Fault,
                );
                return Err(err)
                    .with_context(|| format!("checking {}", self.path.display()));
            }
        };
        log_runtime_event(
            Some(&ctx),
            "config_check",
            &format!("{} is valid", self.path.display()),
            RuntimeEventOutcome::Success,
        );
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
