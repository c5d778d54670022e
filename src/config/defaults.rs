//! Default configuration values
//!
//! Provides default configuration instances and the annotated example file
//! written by `kapply config init`.

use super::schema::Config;

/// Get the default configuration
pub fn default_config() -> Config {
    Config::default()
}

/// Commented starting point for a root config file
pub const EXAMPLE_CONFIG: &str = r#"# kapply configuration
apply:
  # changes applied at once within a batch
  concurrency: 5
  checkIntervalSecs: 5
  timeoutSecs: 900
  maxRetries: 3
  wait: true
  applyIgnored: false
  waitIgnored: false
  againstLastApplied: true
  # update | always-replace | fallback-on-replace
  defaultUpdateStrategy: update
ownership:
  skipOwnershipCheck: false
  additionalLabels: {}
history:
  retention: 200
allowEmpty: false
ignoreFailingApiServices: false
kube: {}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_matches_defaults() {
        let example: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(example, default_config());
    }
}
