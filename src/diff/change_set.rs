//! Pairs existing and desired resources by identity and classifies each pair

use std::collections::BTreeMap;

use tracing::debug;

use super::change::{Change, ChangeFactory, ChangeOp};
use crate::error::{Error, Result};
use crate::resources::{Resource, ResourceKey};

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetOpts {
    /// Compare against the last-applied annotation when present
    pub against_last_applied: bool,
    /// Permit an empty desired set to delete everything
    pub allow_empty: bool,
}

pub struct ChangeSet {
    existing: Vec<Resource>,
    new: Vec<Resource>,
    opts: ChangeSetOpts,
}

impl ChangeSet {
    pub fn new(existing: Vec<Resource>, new: Vec<Resource>, opts: ChangeSetOpts) -> Self {
        Self { existing, new, opts }
    }

    /// Add/Update/Delete changes sorted by identity; Noops are dropped
    pub fn calculate(self) -> Result<Vec<Change>> {
        if self.new.is_empty() && !self.opts.allow_empty {
            let existing = self.existing.iter().filter(|r| !r.is_transient()).count();
            if existing > 0 {
                return Err(Error::EmptyResourceSet { existing });
            }
        }

        let factory = ChangeFactory::new(self.opts.against_last_applied);
        let mut existing: BTreeMap<ResourceKey, Resource> = self
            .existing
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();

        let mut changes = Vec::new();
        for desired in self.new {
            let current = existing.remove(&desired.key());
            let change = factory.new_change(current, Some(desired))?;
            if change.op() == ChangeOp::Noop {
                debug!("No changes for {}", change.resource().description());
                continue;
            }
            changes.push(change);
        }

        for (_, res) in existing {
            if res.is_transient() {
                debug!("Keeping transient {}", res.description());
                continue;
            }
            changes.push(factory.new_change(Some(res), None)?);
        }

        changes.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(changes)
    }
}
