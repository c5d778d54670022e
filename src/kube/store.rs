//! [`ResourceStore`] over the Kubernetes API
//!
//! Kinds are resolved through API discovery, which is cached and re-run
//! once when a kind is not found (e.g. right after its CRD was created).

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, Discovery, Scope, verbs};
use kube::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::resources::{GroupVersion, LabelSelector, Resource, ResourceKey};
use crate::resources::resource::ensure_object;
use crate::store::{ResourceStore, StoreError};

/// High-volume or deprecated kinds never owned by an app
const SKIPPED_KINDS: &[&str] = &["Event", "Endpoints", "ComponentStatus"];

/// Concurrent list requests while scanning all kinds
const LIST_CONCURRENCY: usize = 8;

pub struct KubeStore {
    client: Client,
    discovery: RwLock<Option<Arc<Discovery>>>,
    /// Skip kinds whose aggregated API answers 503 when listing
    ignore_failing_api_services: bool,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: RwLock::new(None),
            ignore_failing_api_services: false,
        }
    }

    pub fn with_ignore_failing_api_services(mut self, ignore: bool) -> Self {
        self.ignore_failing_api_services = ignore;
        self
    }

    async fn discovery(&self, refresh: bool) -> Result<Arc<Discovery>, StoreError> {
        if !refresh {
            if let Some(cached) = self.discovery.read().await.as_ref() {
                return Ok(cached.clone());
            }
        }
        debug!("Running API discovery");
        let fresh = Arc::new(
            Discovery::new(self.client.clone())
                .run()
                .await
                .map_err(classify)?,
        );
        *self.discovery.write().await = Some(fresh.clone());
        Ok(fresh)
    }

    /// API serving an exact apiVersion + kind
    async fn resolve(
        &self,
        gv: &GroupVersion,
        kind: &str,
    ) -> Result<(ApiResource, ApiCapabilities), StoreError> {
        let gvk = GroupVersionKind::gvk(&gv.group, &gv.version, kind);
        if let Some(found) = self.discovery(false).await?.resolve_gvk(&gvk) {
            return Ok(found);
        }
        self.discovery(true)
            .await?
            .resolve_gvk(&gvk)
            .ok_or_else(|| StoreError::NotFound(format!("no API serves {} {}", gv, kind)))
    }

    /// Preferred API for a group + kind, if any is served
    async fn resolve_kind(
        &self,
        group: &str,
        kind: &str,
    ) -> Result<Option<(ApiResource, ApiCapabilities)>, StoreError> {
        let lookup = |d: &Discovery| d.get(group).and_then(|g| g.recommended_kind(kind));
        if let Some(found) = lookup(&*self.discovery(false).await?) {
            return Ok(Some(found));
        }
        Ok(lookup(&*self.discovery(true).await?))
    }

    fn api(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: &str) -> Api<DynamicObject> {
        if matches!(caps.scope, Scope::Namespaced) && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, ar)
        } else {
            Api::all_with(self.client.clone(), ar)
        }
    }

    async fn api_for(&self, res: &Resource) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, caps) = self.resolve(&res.group_version(), res.kind()).await?;
        Ok(self.api(&ar, &caps, res.namespace()))
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<Resource>, StoreError> {
        let discovery = self.discovery(true).await?;
        let listable: Vec<(ApiResource, ApiCapabilities)> = discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .filter(|(ar, caps)| {
                caps.supports_operation(verbs::LIST) && !SKIPPED_KINDS.contains(&ar.kind.as_str())
            })
            .collect();

        let params = ListParams::default().labels(&selector.to_string());
        let params = &params;
        let ignore_failing = self.ignore_failing_api_services;
        let results: Vec<Result<Vec<Resource>, StoreError>> = stream::iter(listable)
            .map(|(ar, _)| async move {
                let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
                match api.list(params).await {
                    Ok(list) => list
                        .items
                        .into_iter()
                        .map(|obj| to_resource(obj, &ar))
                        .collect::<Result<Vec<_>, _>>(),
                    Err(e) if is_skippable_list_error(&e, ignore_failing) => {
                        warn!("Skipping {} {}: {}", ar.api_version, ar.kind, e);
                        Ok(Vec::new())
                    }
                    Err(e) => Err(classify(e)),
                }
            })
            .buffer_unordered(LIST_CONCURRENCY)
            .collect()
            .await;

        let mut resources = Vec::new();
        for result in results {
            resources.extend(result?);
        }
        Ok(resources)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError> {
        let Some((ar, caps)) = self.resolve_kind(&key.group, &key.kind).await? else {
            debug!("No API serves {}, treating as absent", key);
            return Ok(None);
        };
        self.api(&ar, &caps, &key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(classify)?
            .map(|obj| to_resource(obj, &ar))
            .transpose()
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, StoreError> {
        let api = self.api_for(resource).await?;
        let created = api
            .create(&PostParams::default(), &to_dynamic(resource)?)
            .await
            .map_err(classify)?;
        resource_like(created, resource)
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, StoreError> {
        let api = self.api_for(resource).await?;
        let updated = api
            .replace(resource.name(), &PostParams::default(), &to_dynamic(resource)?)
            .await
            .map_err(classify)?;
        resource_like(updated, resource)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let Some((ar, caps)) = self.resolve_kind(&key.group, &key.kind).await? else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        self.api(&ar, &caps, &key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn failing_group_versions(&self) -> Result<Vec<GroupVersion>, StoreError> {
        let api: Api<APIService> = Api::all(self.client.clone());
        let services = api.list(&ListParams::default()).await.map_err(classify)?;

        Ok(services
            .items
            .into_iter()
            .filter_map(|svc| {
                let spec = svc.spec?;
                // local APIs are served by kube-apiserver itself
                spec.service.as_ref()?;
                let available = svc
                    .status
                    .and_then(|s| s.conditions)
                    .unwrap_or_default()
                    .iter()
                    .any(|c| c.type_ == "Available" && c.status == "True");
                (!available).then(|| {
                    GroupVersion::new(spec.group.unwrap_or_default(), spec.version.unwrap_or_default())
                })
            })
            .collect())
    }
}

/// Map a client error onto the store's error classes
fn classify(err: kube::Error) -> StoreError {
    let kube::Error::Api(resp) = &err else {
        return StoreError::Unavailable(err.to_string());
    };
    let text = format!("{} (code {})", resp, resp.code);
    match (resp.code, resp.reason.as_str()) {
        (_, "AlreadyExists") => StoreError::AlreadyExists(text),
        (404, _) | (_, "NotFound") => StoreError::NotFound(text),
        (409, _) | (_, "Conflict") => StoreError::Conflict(text),
        (422, _) | (_, "Invalid") => StoreError::Invalid(text),
        (429 | 503 | 504, _)
        | (_, "TooManyRequests" | "ServiceUnavailable" | "Timeout" | "ServerTimeout") => {
            StoreError::Unavailable(text)
        }
        _ => StoreError::Other(text),
    }
}

/// A kind whose list fails is left out of a scan when its API is gone (404)
/// or, if allowed, when its aggregated API is down (503)
fn is_skippable_list_error(err: &kube::Error, ignore_failing_api_services: bool) -> bool {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => true,
            503 => ignore_failing_api_services,
            _ => false,
        },
        _ => false,
    }
}

fn to_dynamic(resource: &Resource) -> Result<DynamicObject, StoreError> {
    serde_json::from_value(resource.as_value().clone())
        .map_err(|e| StoreError::Invalid(format!("{}: {}", resource.description(), e)))
}

/// List items come back without apiVersion/kind
fn with_type_meta(mut value: Value, api_version: &str, kind: &str) -> Value {
    let root = ensure_object(&mut value);
    root.entry("apiVersion")
        .or_insert_with(|| Value::String(api_version.to_string()));
    root.entry("kind")
        .or_insert_with(|| Value::String(kind.to_string()));
    value
}

fn to_resource(obj: DynamicObject, ar: &ApiResource) -> Result<Resource, StoreError> {
    let value = serde_json::to_value(obj).map_err(|e| StoreError::Other(e.to_string()))?;
    Resource::from_value(with_type_meta(value, &ar.api_version, &ar.kind))
        .map_err(|e| StoreError::Invalid(e.to_string()))
}

fn resource_like(obj: DynamicObject, like: &Resource) -> Result<Resource, StoreError> {
    let value = serde_json::to_value(obj).map_err(|e| StoreError::Other(e.to_string()))?;
    Resource::from_value(with_type_meta(value, like.api_version(), like.kind()))
        .map_err(|e| StoreError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use serde_json::json;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {}", code),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_classify_by_code_and_reason() {
        assert!(matches!(classify(api_error(404, "NotFound")), StoreError::NotFound(_)));
        assert!(matches!(
            classify(api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists(_)
        ));
        assert!(matches!(classify(api_error(409, "Conflict")), StoreError::Conflict(_)));
        assert!(matches!(classify(api_error(422, "Invalid")), StoreError::Invalid(_)));
        assert!(matches!(
            classify(api_error(503, "ServiceUnavailable")),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(classify(api_error(504, "Timeout")), StoreError::Unavailable(_)));
        assert!(matches!(classify(api_error(403, "Forbidden")), StoreError::Other(_)));

        // a message mentioning another class does not change the verdict
        let err = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "configmaps \"NotFound\" is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        match classify(err) {
            StoreError::Other(text) => assert!(text.contains("code 403")),
            other => panic!("unexpected class: {:?}", other),
        }
    }

    #[test]
    fn test_only_missing_apis_are_skipped_when_listing() {
        assert!(is_skippable_list_error(&api_error(404, "NotFound"), false));
        assert!(!is_skippable_list_error(&api_error(503, "ServiceUnavailable"), false));
        assert!(is_skippable_list_error(&api_error(503, "ServiceUnavailable"), true));
        assert!(!is_skippable_list_error(&api_error(500, "InternalError"), true));
        assert!(!is_skippable_list_error(&api_error(403, "Forbidden"), true));
    }

    #[test]
    fn test_type_meta_filled_only_when_missing() {
        let value = with_type_meta(json!({"metadata": {"name": "a"}}), "v1", "ConfigMap");
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["kind"], "ConfigMap");

        let value = with_type_meta(
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "a"}}),
            "v1",
            "ConfigMap",
        );
        assert_eq!(value["kind"], "Deployment");
    }

    #[test]
    fn test_resource_converts_to_dynamic_object() {
        let res = Resource::from_value(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "ns1", "labels": {"x": "y"}},
            "data": {"k": "v"}
        }))
        .unwrap();
        let obj = to_dynamic(&res).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("a"));
        assert_eq!(obj.data["data"]["k"], "v");

        let ar = ApiResource::erase::<k8s_openapi::api::core::v1::ConfigMap>(&());
        let back = to_resource(obj, &ar).unwrap();
        assert_eq!(back.key(), res.key());
    }
}
