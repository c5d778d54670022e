//! Scoped history tracking around an operation

use std::future::Future;

use tracing::warn;

use super::record::App;
use crate::error::Result;

/// Records one history entry for the duration of an operation
pub struct Touch<'a> {
    app: &'a App,
    description: String,
    namespaces: Vec<String>,
    /// Log instead of fail when the success cannot be recorded
    ignore_success_err: bool,
}

impl<'a> Touch<'a> {
    pub fn new(app: &'a App, description: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            app,
            description: description.into(),
            namespaces,
            ignore_success_err: false,
        }
    }

    pub fn ignore_success_err(mut self, ignore: bool) -> Self {
        self.ignore_success_err = ignore;
        self
    }

    /// Run `operation` between opening and finalizing the history entry
    ///
    /// The operation's own error always wins over a failure to record it.
    pub async fn run<T, F>(self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut change = self
            .app
            .begin_change(&self.description, self.namespaces)
            .await?;

        let outcome = operation.await;

        match &outcome {
            Ok(_) => {
                if let Err(e) = change.succeed().await {
                    if !self.ignore_success_err {
                        return Err(e);
                    }
                    warn!("Could not record success of '{}': {}", self.description, e);
                }
            }
            Err(_) => {
                if let Err(e) = change.fail().await {
                    warn!("Could not record failure of '{}': {}", self.description, e);
                }
            }
        }

        if let Err(e) = self.app.record_last_change(change.meta()).await {
            warn!("Could not record last change of {}: {}", self.app.description(), e);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{MemoryStore, StoreError, StoreOp};
    use std::sync::Arc;

    fn app(store: &MemoryStore) -> App {
        App::new("web", "apps", Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_returned() {
        let store = MemoryStore::new();
        let app = app(&store);

        let err = Touch::new(&app, "deploy", vec![])
            .run(async { Err::<(), _>(Error::EmptyResourceSet { existing: 1 }) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResourceSet { .. }));

        let changes = app.changes().await.unwrap();
        assert_eq!(changes[0].meta().successful, Some(false));
        assert!(changes[0].meta().finished_at.is_some());
    }

    #[tokio::test]
    async fn test_last_change_is_kept_on_the_record() {
        let store = MemoryStore::new();
        let app = app(&store);
        app.create_or_load().await.unwrap();

        Touch::new(&app, "deploy: 1 create", vec!["ns1".into()])
            .run(async { Ok(()) })
            .await
            .unwrap();
        let last = app.meta().await.unwrap().unwrap().last_change.unwrap();
        assert_eq!(last.description, "deploy: 1 create");
        assert_eq!(last.successful, Some(true));
        assert!(last.finished_at.is_some());

        let _ = Touch::new(&app, "deploy: 1 update", vec![])
            .run(async { Err::<(), _>(Error::EmptyResourceSet { existing: 1 }) })
            .await;
        let last = app.meta().await.unwrap().unwrap().last_change.unwrap();
        assert_eq!(last.description, "deploy: 1 update");
        assert_eq!(last.successful, Some(false));
    }

    #[tokio::test]
    async fn test_ignore_success_err() {
        let store = MemoryStore::new();
        let app = app(&store);
        store.fail(StoreOp::Update, None, StoreError::Invalid("rejected".into()), 2);

        let value = Touch::new(&app, "deploy", vec![])
            .ignore_success_err(true)
            .run(async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = Touch::new(&app, "deploy", vec![])
            .run(async { Ok(7) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
    }
}
