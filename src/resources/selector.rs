//! Equality-based label selectors
//!
//! Supports `key=value`, `key==value`, `key!=value`, `key` and `!key`
//! requirements joined by commas. Set-based requirements (`in`, `notin`)
//! are not needed by the engine and are rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::NotExists(k) => write!(f, "!{}", k),
        }
    }
}

/// Conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector with a single `key=value` requirement
    pub fn equals(key: &str, value: &str) -> Self {
        Self {
            requirements: vec![Requirement::Equals(key.to_string(), value.to_string())],
        }
    }

    /// Selector requiring the key to be present
    pub fn exists(key: &str) -> Self {
        Self {
            requirements: vec![Requirement::Exists(key.to_string())],
        }
    }

    pub fn and(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidSelector {
            selector: s.to_string(),
            reason: reason.to_string(),
        };

        let mut requirements = Vec::new();
        for part in s.split(',').map(str::trim) {
            if part.is_empty() {
                if s.trim().is_empty() {
                    continue;
                }
                return Err(invalid("empty requirement"));
            }

            let requirement = if let Some((k, v)) = part.split_once("!=") {
                Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = part.split_once("==") {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = part.split_once('=') {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = part.strip_prefix('!') {
                Requirement::NotExists(k.trim().to_string())
            } else if part.contains(char::is_whitespace) || part.contains('(') {
                return Err(invalid("set-based requirements are not supported"));
            } else {
                Requirement::Exists(part.to_string())
            };

            let (key, value) = match &requirement {
                Requirement::Equals(k, v) | Requirement::NotEquals(k, v) => (k, Some(v)),
                Requirement::Exists(k) | Requirement::NotExists(k) => (k, None),
            };
            if !is_valid_key(key) {
                return Err(invalid(&format!("invalid label key '{}'", key)));
            }
            if let Some(value) = value {
                if !is_valid_value(value) {
                    return Err(invalid(&format!("invalid label value '{}'", value)));
                }
            }
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl FromStr for LabelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

fn is_valid_key(key: &str) -> bool {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty()
                || prefix.len() > 253
                || !prefix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
            {
                return false;
            }
            name
        }
        None => key,
    };
    !name.is_empty() && name.len() <= 63 && is_valid_value(name)
}

fn is_valid_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let alnum_edges = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    value.len() <= 63
        && alnum_edges
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_and_match() {
        let sel = LabelSelector::parse("kapply.dev/app=123,tier!=db,owner,!skip").unwrap();
        assert_eq!(sel.requirements().len(), 4);
        assert!(sel.matches(&labels(&[("kapply.dev/app", "123"), ("owner", "x")])));
        assert!(!sel.matches(&labels(&[("kapply.dev/app", "123")])));
        assert!(!sel.matches(&labels(&[
            ("kapply.dev/app", "123"),
            ("owner", "x"),
            ("skip", "")
        ])));
        assert!(!sel.matches(&labels(&[
            ("kapply.dev/app", "123"),
            ("owner", "x"),
            ("tier", "db")
        ])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let sel = LabelSelector::parse("").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_display_round_trip() {
        let text = "kapply.dev/app=123,a!=b,c,!d";
        assert_eq!(LabelSelector::parse(text).unwrap().to_string(), text);
        assert_eq!(
            LabelSelector::parse("a==b").unwrap().to_string(),
            "a=b"
        );
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(
            LabelSelector::parse("env in (prod)"),
            Err(Error::InvalidSelector { .. })
        ));
        assert!(LabelSelector::parse("a=b,,c").is_err());
        assert!(LabelSelector::parse("=b").is_err());
        assert!(LabelSelector::parse("a=-b").is_err());
        assert!(LabelSelector::parse("Bad_Prefix/a=b").is_err());
    }
}
