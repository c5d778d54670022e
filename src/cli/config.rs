//! `kapply config` subcommands

use anyhow::{Context, Result};
use clap::Subcommand;

use kapply::config::{self, paths, ConfigLoader, CONFIG_KEYS, EXAMPLE_CONFIG};

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Get configuration value
    Get {
        /// Configuration key (e.g., "apply.concurrency", "kube.context")
        key: Option<String>,
    },
    /// Set configuration value
    Set {
        /// Configuration key (e.g., "apply.concurrency", "kube.context")
        key: String,
        /// Configuration value (empty clears optional settings)
        value: String,
    },
    /// List all configuration keys with their values
    List,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
    /// Write a commented example configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Handle configuration subcommands
pub fn handle_config_command(cmd: ConfigSubcommand) -> Result<()> {
    match cmd {
        ConfigSubcommand::Get { key } => {
            let config = ConfigLoader::load().context("Failed to load configuration")?;
            if let Some(key) = key {
                println!("{}", config::get_config_value(&config, &key)?);
            } else {
                let yaml =
                    serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
                print!("{}", yaml);
            }
        }
        ConfigSubcommand::Set { key, value } => {
            let path = paths::root_config_path();
            // env overrides must not leak into the saved file
            let mut config = if path.exists() {
                ConfigLoader::load_file(&path)?
            } else {
                ConfigLoader::load_defaults()
            };

            config::set_config_value(&mut config, &key, &value)
                .with_context(|| format!("Failed to set {} = {}", key, value))?;
            ConfigLoader::check(&config)?;

            ConfigLoader::save_root(&config).context("Failed to save configuration")?;
            println!("Configuration saved");
        }
        ConfigSubcommand::List => {
            let config = ConfigLoader::load().context("Failed to load configuration")?;
            let width = CONFIG_KEYS.iter().map(|k| k.len()).max().unwrap_or(0);
            for key in CONFIG_KEYS {
                let value = config::get_config_value(&config, key)?;
                println!("{:<width$}  {}", key, value, width = width);
            }
        }
        ConfigSubcommand::Path => {
            println!("{}", paths::root_config_path().display());
        }
        ConfigSubcommand::Validate => match ConfigLoader::validate() {
            Ok(_) => {
                println!("Configuration is valid");
            }
            Err(e) => {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
        },
        ConfigSubcommand::Init { force } => {
            let path = paths::root_config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                paths::ensure_dir(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, EXAMPLE_CONFIG)
                .with_context(|| format!("Failed to write config file: {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
