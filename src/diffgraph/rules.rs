//! Change groups and change rules declared through annotations
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     kapply.dev/change-group: "db"
//!     kapply.dev/change-rule: "upsert after upserting db-migrations"
//! ```
//!
//! Several groups or rules are separated by `,`, or declared under suffixed
//! keys (`kapply.dev/change-rule.1`).

use std::collections::BTreeSet;
use std::fmt;

use crate::diff::{Change, ChangeOp};
use crate::error::{Error, Result};
use crate::models::annotations;

/// Which of the annotated change's own operations a rule constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrder {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRule {
    pub action: RuleAction,
    pub order: RuleOrder,
    pub target_action: RuleAction,
    pub target_group: String,
}

impl RuleAction {
    pub fn matches(&self, op: ChangeOp) -> bool {
        match self {
            RuleAction::Upsert => op.is_upsert(),
            RuleAction::Delete => op == ChangeOp::Delete,
        }
    }
}

impl ChangeRule {
    /// Parse `<upsert|delete> <before|after> <upserting|deleting> <group>`
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let [action, order, target_action, group] = parts.as_slice() else {
            return Err("expected '<upsert|delete> <before|after> <upserting|deleting> <group>'".to_string());
        };

        let action = match *action {
            "upsert" => RuleAction::Upsert,
            "delete" => RuleAction::Delete,
            other => return Err(format!("unknown action '{}'", other)),
        };
        let order = match *order {
            "before" => RuleOrder::Before,
            "after" => RuleOrder::After,
            other => return Err(format!("unknown order '{}'", other)),
        };
        let target_action = match *target_action {
            "upserting" => RuleAction::Upsert,
            "deleting" => RuleAction::Delete,
            other => return Err(format!("unknown target action '{}'", other)),
        };
        validate_group(group)?;

        Ok(Self {
            action,
            order,
            target_action,
            target_group: group.to_string(),
        })
    }
}

impl fmt::Display for ChangeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            RuleAction::Upsert => "upsert",
            RuleAction::Delete => "delete",
        };
        let order = match self.order {
            RuleOrder::Before => "before",
            RuleOrder::After => "after",
        };
        let target = match self.target_action {
            RuleAction::Upsert => "upserting",
            RuleAction::Delete => "deleting",
        };
        write!(f, "{} {} {} {}", action, order, target, self.target_group)
    }
}

fn validate_group(group: &str) -> std::result::Result<(), String> {
    if group.is_empty()
        || !group
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(format!("invalid group name '{}'", group));
    }
    Ok(())
}

/// Groups the change's resource belongs to
pub fn groups_of(change: &Change) -> Result<BTreeSet<String>> {
    let res = change.resource();
    let mut groups = BTreeSet::new();
    for (key, value) in res.annotations() {
        if !annotations::matches_key(&key, annotations::CHANGE_GROUP) {
            continue;
        }
        for group in value.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            validate_group(group).map_err(|reason| Error::InvalidChangeRule {
                resource: res.description(),
                rule: value.clone(),
                reason,
            })?;
            groups.insert(group.to_string());
        }
    }
    Ok(groups)
}

/// Rules declared on the change's resource
pub fn rules_of(change: &Change) -> Result<Vec<ChangeRule>> {
    let res = change.resource();
    let mut rules = Vec::new();
    for (key, value) in res.annotations() {
        if !annotations::matches_key(&key, annotations::CHANGE_RULE) {
            continue;
        }
        for text in value.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let rule = ChangeRule::parse(text).map_err(|reason| Error::InvalidChangeRule {
                resource: res.description(),
                rule: text.to_string(),
                reason,
            })?;
            rules.push(rule);
        }
    }
    Ok(rules)
}
