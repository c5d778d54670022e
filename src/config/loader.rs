//! Configuration loading and validation
//!
//! Layers, lowest to highest precedence: built-in defaults, the root config
//! file, environment variable overrides.

use super::{defaults, paths, schema::Config};
use anyhow::{Context, Result};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with all layers merged
    pub fn load() -> Result<Config> {
        Self::load_from(&paths::root_config_path())
    }

    /// Load with `path` as the root config file; a missing file means defaults
    pub fn load_from(path: &Path) -> Result<Config> {
        let config = if path.exists() {
            Self::load_file(path)?
        } else {
            Self::load_defaults()
        };
        Self::apply_env_overrides(config)
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        // an empty file is a valid, all-defaults config
        if contents.trim().is_empty() {
            return Ok(Self::load_defaults());
        }

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the merged configuration and check its values
    pub fn validate() -> Result<Config> {
        let config = Self::load().context("Failed to load merged configuration")?;
        Self::check(&config)?;
        Ok(config)
    }

    /// Value constraints serde cannot express
    pub fn check(config: &Config) -> Result<()> {
        if config.apply.concurrency == 0 {
            anyhow::bail!("apply.concurrency must be at least 1");
        }
        if config.apply.check_interval_secs == 0 {
            anyhow::bail!("apply.checkIntervalSecs must be at least 1");
        }
        if config.apply.timeout_secs == 0 {
            anyhow::bail!("apply.timeoutSecs must be at least 1");
        }
        if config.history.retention == 0 {
            anyhow::bail!("history.retention must be at least 1");
        }
        if config
            .ownership
            .additional_labels
            .contains_key(crate::models::annotations::APP_LABEL)
        {
            anyhow::bail!(
                "ownership.additionalLabels must not set the ownership label '{}'",
                crate::models::annotations::APP_LABEL
            );
        }
        Ok(())
    }

    /// Load default configuration
    pub fn load_defaults() -> Config {
        defaults::default_config()
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut config: Config) -> Result<Config> {
        if let Ok(concurrency) = std::env::var("KAPPLY_CONCURRENCY") {
            config.apply.concurrency = concurrency
                .parse()
                .context("KAPPLY_CONCURRENCY must be a number")?;
        }

        if let Ok(timeout) = std::env::var("KAPPLY_TIMEOUT_SECS") {
            config.apply.timeout_secs = timeout
                .parse()
                .context("KAPPLY_TIMEOUT_SECS must be a number")?;
        }

        if let Ok(allow_empty) = std::env::var("KAPPLY_ALLOW_EMPTY") {
            config.allow_empty = allow_empty
                .parse()
                .context("KAPPLY_ALLOW_EMPTY must be 'true' or 'false'")?;
        }

        if let Ok(context) = std::env::var("KAPPLY_KUBE_CONTEXT") {
            config.kube.context = Some(context);
        }

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;

        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Save root configuration
    pub fn save_root(config: &Config) -> Result<()> {
        Self::save(config, &paths::root_config_path())
    }
}
