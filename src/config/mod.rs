//! Configuration system for kapply
//!
//! A root YAML file layered over built-in defaults, with environment
//! variable overrides on top.

mod defaults;
pub mod loader;
pub mod paths;
pub mod schema;

pub use defaults::EXAMPLE_CONFIG;
pub use loader::ConfigLoader;
pub use schema::{ApplyConfig, Config, HistoryConfig, KubeConfig, OwnershipConfig};

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Keys accepted by [`get_config_value`] and [`set_config_value`]
pub const CONFIG_KEYS: &[&str] = &[
    "apply.concurrency",
    "apply.checkIntervalSecs",
    "apply.timeoutSecs",
    "apply.maxRetries",
    "apply.wait",
    "apply.applyIgnored",
    "apply.waitIgnored",
    "apply.againstLastApplied",
    "apply.defaultUpdateStrategy",
    "ownership.skipOwnershipCheck",
    "ownership.additionalLabels",
    "history.retention",
    "allowEmpty",
    "ignoreFailingApiServices",
    "kube.configPath",
    "kube.context",
    "kube.cluster",
    "kube.user",
    "kube.host",
    "kube.insecure",
];

/// Get a configuration value by key (dot notation)
pub fn get_config_value(config: &Config, key: &str) -> anyhow::Result<String> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    match key {
        "apply.concurrency" => Ok(config.apply.concurrency.to_string()),
        "apply.checkIntervalSecs" => Ok(config.apply.check_interval_secs.to_string()),
        "apply.timeoutSecs" => Ok(config.apply.timeout_secs.to_string()),
        "apply.maxRetries" => Ok(config.apply.max_retries.to_string()),
        "apply.wait" => Ok(config.apply.wait.to_string()),
        "apply.applyIgnored" => Ok(config.apply.apply_ignored.to_string()),
        "apply.waitIgnored" => Ok(config.apply.wait_ignored.to_string()),
        "apply.againstLastApplied" => Ok(config.apply.against_last_applied.to_string()),
        "apply.defaultUpdateStrategy" => Ok(config.apply.default_update_strategy.to_string()),
        "ownership.skipOwnershipCheck" => Ok(config.ownership.skip_ownership_check.to_string()),
        "ownership.additionalLabels" => Ok(config
            .ownership
            .additional_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")),
        "history.retention" => Ok(config.history.retention.to_string()),
        "allowEmpty" => Ok(config.allow_empty.to_string()),
        "ignoreFailingApiServices" => Ok(config.ignore_failing_api_services.to_string()),
        "kube.configPath" => Ok(config
            .kube
            .config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()),
        "kube.context" => Ok(opt(&config.kube.context)),
        "kube.cluster" => Ok(opt(&config.kube.cluster)),
        "kube.user" => Ok(opt(&config.kube.user)),
        "kube.host" => Ok(opt(&config.kube.host)),
        "kube.insecure" => Ok(config.kube.insecure.to_string()),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}

/// Set a configuration value by key (dot notation)
///
/// Empty values clear optional settings.
pub fn set_config_value(config: &mut Config, key: &str, value: &str) -> anyhow::Result<()> {
    let opt = |v: &str| (!v.is_empty()).then(|| v.to_string());
    match key {
        "apply.concurrency" => {
            config.apply.concurrency = value
                .parse()
                .context("apply.concurrency must be a number")?;
        }
        "apply.checkIntervalSecs" => {
            config.apply.check_interval_secs = value
                .parse()
                .context("apply.checkIntervalSecs must be a number")?;
        }
        "apply.timeoutSecs" => {
            config.apply.timeout_secs = value
                .parse()
                .context("apply.timeoutSecs must be a number")?;
        }
        "apply.maxRetries" => {
            config.apply.max_retries = value
                .parse()
                .context("apply.maxRetries must be a number")?;
        }
        "apply.wait" => {
            config.apply.wait = value
                .parse()
                .context("apply.wait must be 'true' or 'false'")?;
        }
        "apply.applyIgnored" => {
            config.apply.apply_ignored = value
                .parse()
                .context("apply.applyIgnored must be 'true' or 'false'")?;
        }
        "apply.waitIgnored" => {
            config.apply.wait_ignored = value
                .parse()
                .context("apply.waitIgnored must be 'true' or 'false'")?;
        }
        "apply.againstLastApplied" => {
            config.apply.against_last_applied = value
                .parse()
                .context("apply.againstLastApplied must be 'true' or 'false'")?;
        }
        "apply.defaultUpdateStrategy" => {
            config.apply.default_update_strategy =
                value.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        "ownership.skipOwnershipCheck" => {
            config.ownership.skip_ownership_check = value
                .parse()
                .context("ownership.skipOwnershipCheck must be 'true' or 'false'")?;
        }
        "ownership.additionalLabels" => {
            // YAML map or comma-separated key=value pairs
            let labels: BTreeMap<String, String> = if value.trim_start().starts_with('{') {
                serde_yaml::from_str(value)
                    .context("ownership.additionalLabels must be a YAML map (e.g., {team: web})")?
            } else {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|pair| {
                        pair.split_once('=')
                            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                            .with_context(|| format!("'{}' is not a key=value pair", pair))
                    })
                    .collect::<anyhow::Result<_>>()?
            };
            config.ownership.additional_labels = labels;
        }
        "history.retention" => {
            config.history.retention = value
                .parse()
                .context("history.retention must be a number")?;
        }
        "allowEmpty" => {
            config.allow_empty = value
                .parse()
                .context("allowEmpty must be 'true' or 'false'")?;
        }
        "ignoreFailingApiServices" => {
            config.ignore_failing_api_services = value
                .parse()
                .context("ignoreFailingApiServices must be 'true' or 'false'")?;
        }
        "kube.configPath" => config.kube.config_path = opt(value).map(PathBuf::from),
        "kube.context" => config.kube.context = opt(value),
        "kube.cluster" => config.kube.cluster = opt(value),
        "kube.user" => config.kube.user = opt(value),
        "kube.host" => config.kube.host = opt(value),
        "kube.insecure" => {
            config.kube.insecure = value
                .parse()
                .context("kube.insecure must be 'true' or 'false'")?;
        }
        _ => return Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }

    Ok(())
}
