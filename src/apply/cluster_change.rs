//! Executing a single change against the store and waiting for it

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::converged::{self, Convergence};
use super::events::{ApplyEvent, EventSink};
use crate::diff::{Change, ChangeOp};
use crate::error::{Error, Result};
use crate::models::annotations;
use crate::resources::Resource;
use crate::store::{ResourceStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Pending,
    Applying,
    Waiting,
    Converged,
    Failed,
}

/// How an update reaches the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStrategy {
    #[default]
    Update,
    /// Delete and re-create instead of updating
    AlwaysReplace,
    /// Update, re-creating when the server rejects the update as invalid
    FallbackOnReplace,
}

impl UpdateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStrategy::Update => "update",
            UpdateStrategy::AlwaysReplace => "always-replace",
            UpdateStrategy::FallbackOnReplace => "fallback-on-replace",
        }
    }

    /// Strategy from the resource's annotation, else `default`
    pub fn for_resource(res: &Resource, default: UpdateStrategy) -> Self {
        match res.annotation(annotations::UPDATE_STRATEGY) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!("{} on {}, using {}", e, res.description(), default);
                default
            }),
            None => default,
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UpdateStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" | "update" => Ok(UpdateStrategy::Update),
            "always-replace" => Ok(UpdateStrategy::AlwaysReplace),
            "fallback-on-replace" => Ok(UpdateStrategy::FallbackOnReplace),
            other => Err(format!("Unknown update strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(900),
        }
    }
}

/// Everything a change needs from its batch while executing
#[derive(Clone, Copy)]
pub struct ApplyContext<'a> {
    pub store: &'a dyn ResourceStore,
    pub events: &'a EventSink,
    pub wait: WaitPolicy,
    pub max_retries: usize,
    pub retry_backoff: Duration,
}

pub struct ClusterChange {
    change: Change,
    state: ChangeState,
    strategy: UpdateStrategy,
    /// Desired object as submitted; its resourceVersion follows conflicts
    submitted: Option<Resource>,
}

impl ClusterChange {
    pub fn new(change: Change, default_strategy: UpdateStrategy) -> Self {
        let strategy = change
            .desired()
            .map(|res| UpdateStrategy::for_resource(res, default_strategy))
            .unwrap_or(default_strategy);
        let submitted = change.desired().cloned();
        Self {
            change,
            state: ChangeState::Pending,
            strategy,
            submitted,
        }
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    pub fn state(&self) -> ChangeState {
        self.state
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Submit the change, then optionally wait for it to converge
    pub async fn execute(&mut self, ctx: &ApplyContext<'_>, wait: bool) -> Result<()> {
        let op = self.change.op();
        let resource = self.change.resource().description();

        self.state = ChangeState::Applying;
        ctx.events.emit(ApplyEvent::ChangeStarted {
            op,
            resource: resource.clone(),
        });
        info!("{} {}", op, resource);

        let mut outcome = self.submit_with_retries(ctx).await;
        if outcome.is_ok() && wait {
            self.state = ChangeState::Waiting;
            outcome = self.wait(ctx).await;
        }

        match outcome {
            Ok(()) => {
                self.state = ChangeState::Converged;
                ctx.events.emit(ApplyEvent::ChangeConverged { op, resource });
                Ok(())
            }
            Err(e) => {
                self.state = ChangeState::Failed;
                warn!("{} {} failed: {}", op, resource, e);
                ctx.events.emit(ApplyEvent::ChangeFailed {
                    op,
                    resource,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn submit_with_retries(&mut self, ctx: &ApplyContext<'_>) -> Result<()> {
        let mut attempt = 0;
        loop {
            let err = match self.submit(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let retryable = match &err {
                Error::Remote { source, .. } => source.is_retryable(),
                _ => false,
            };
            if !retryable || attempt >= ctx.max_retries {
                return Err(err);
            }

            attempt += 1;
            ctx.events.emit(ApplyEvent::Retrying {
                op: self.change.op(),
                resource: self.change.resource().description(),
                attempt,
                error: err.to_string(),
            });
            warn!("Retrying (attempt {}): {}", attempt, err);

            if let Error::Remote {
                source: StoreError::Conflict(_),
                ..
            } = &err
            {
                self.refresh_resource_version(ctx).await;
            }
            tokio::time::sleep(ctx.retry_backoff * attempt as u32).await;
        }
    }

    async fn submit(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        match self.change.op() {
            ChangeOp::Add => self.create(ctx).await,
            ChangeOp::Update => match self.strategy {
                UpdateStrategy::Update => self.update(ctx).await,
                UpdateStrategy::AlwaysReplace => self.replace(ctx).await,
                UpdateStrategy::FallbackOnReplace => match self.update(ctx).await {
                    Err(Error::Remote {
                        source: StoreError::Invalid(reason),
                        ..
                    }) => {
                        info!(
                            "Update of {} rejected ({}), replacing",
                            self.change.resource().description(),
                            reason
                        );
                        self.replace(ctx).await
                    }
                    other => other,
                },
            },
            ChangeOp::Delete => self.delete(ctx).await,
            ChangeOp::Noop => Ok(()),
        }
    }

    fn desired(&self) -> Result<&Resource> {
        self.submitted.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!(
                "{} has no desired state",
                self.change.description()
            ))
        })
    }

    async fn create(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        let desired = self.desired()?;
        ctx.store
            .create(desired)
            .await
            .map(|_| ())
            .map_err(|e| Error::remote("create", desired.description(), e))
    }

    async fn update(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        let desired = self.desired()?;
        ctx.store
            .update(desired)
            .await
            .map(|_| ())
            .map_err(|e| Error::remote("update", desired.description(), e))
    }

    async fn delete(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        let res = self.change.resource();
        match ctx.store.delete(&res.key()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{} already gone", res.description());
                Ok(())
            }
            Err(e) => Err(Error::remote("delete", res.description(), e)),
        }
    }

    /// Delete, wait until gone, create again
    async fn replace(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        self.delete(ctx).await?;
        match tokio::time::timeout(ctx.wait.timeout, self.poll_gone(ctx)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(Error::ConvergenceTimeout {
                    op: ChangeOp::Delete,
                    resource: self.change.resource().description(),
                    timeout: ctx.wait.timeout,
                });
            }
        }

        let mut fresh = self.desired()?.clone();
        fresh.set_resource_version(None);
        ctx.store
            .create(&fresh)
            .await
            .map(|_| ())
            .map_err(|e| Error::remote("create", fresh.description(), e))
    }

    async fn refresh_resource_version(&mut self, ctx: &ApplyContext<'_>) {
        let Some(submitted) = self.submitted.as_mut() else {
            return;
        };
        match ctx.store.get(&submitted.key()).await {
            Ok(Some(live)) => submitted.set_resource_version(live.resource_version()),
            Ok(None) => submitted.set_resource_version(None),
            Err(e) => debug!("Refreshing resourceVersion of {}: {}", submitted.description(), e),
        }
    }

    async fn wait(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        let polling = async {
            match self.change.op() {
                ChangeOp::Delete => self.poll_gone(ctx).await,
                _ => self.poll_converged(ctx).await,
            }
        };
        match tokio::time::timeout(ctx.wait.timeout, polling).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConvergenceTimeout {
                op: self.change.op(),
                resource: self.change.resource().description(),
                timeout: ctx.wait.timeout,
            }),
        }
    }

    async fn poll_gone(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        let res = self.change.resource();
        let key = res.key();
        let mut last_message = None;
        loop {
            let message = match ctx.store.get(&key).await {
                Ok(None) => return Ok(()),
                Ok(Some(_)) => "waiting to be deleted".to_string(),
                Err(e) if e.is_retryable() => e.to_string(),
                Err(e) => return Err(Error::remote("get", res.description(), e)),
            };
            self.report_waiting(ctx, &mut last_message, message);
            tokio::time::sleep(ctx.wait.check_interval).await;
        }
    }

    async fn poll_converged(&self, ctx: &ApplyContext<'_>) -> Result<()> {
        let res = self.change.resource();
        let key = res.key();
        let mut last_message = None;
        loop {
            let message = match ctx.store.get(&key).await {
                Ok(Some(live)) => match converged::check(ctx.store, &live).await {
                    Convergence::Converged => return Ok(()),
                    Convergence::Failed(message) => {
                        return Err(Error::ConvergenceFailed {
                            op: self.change.op(),
                            resource: res.description(),
                            message,
                        });
                    }
                    Convergence::Waiting(message) => message,
                },
                Ok(None) => "waiting to appear".to_string(),
                Err(e) if e.is_retryable() => e.to_string(),
                Err(e) => return Err(Error::remote("get", res.description(), e)),
            };
            self.report_waiting(ctx, &mut last_message, message);
            tokio::time::sleep(ctx.wait.check_interval).await;
        }
    }

    fn report_waiting(&self, ctx: &ApplyContext<'_>, last: &mut Option<String>, message: String) {
        if last.as_deref() == Some(message.as_str()) {
            return;
        }
        debug!("{}: {}", self.change.resource().description(), message);
        ctx.events.emit(ApplyEvent::Waiting {
            resource: self.change.resource().description(),
            message: message.clone(),
        });
        *last = Some(message);
    }
}
