// Keel Core - Cluster API client
//
// The cluster API server itself is an external collaborator; this module
// pins down the contract the controllers and runtimes rely on: CRUD over
// JSON-encoded resources keyed by (kind, namespace, name), a status
// sub-resource, optimistic concurrency on resourceVersion, and a broadcast
// watch stream. `ClusterClient` layers typed access and impersonation on
// top of any backend.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{KeelError, KeelResult};
use crate::meta::ObjectMeta;

/// Environment flag that disables per-query impersonation (local development)
pub const SKIP_IMPERSONATION_ENV: &str = "SKIP_IMPERSONATION";

/// Typed resource stored in the cluster
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// Change notification emitted by the cluster API
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: String,
    pub event_type: WatchEventType,
    pub namespace: String,
    pub name: String,
}

/// Raw storage contract; implemented by `InMemoryCluster` and by any real
/// API-server adapter
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> KeelResult<Option<Value>>;

    async fn list(&self, kind: &str, namespace: &str) -> KeelResult<Vec<Value>>;

    /// All objects of a kind across namespaces (startup resync)
    async fn list_all(&self, kind: &str) -> KeelResult<Vec<Value>>;

    async fn create(&self, kind: &str, object: Value) -> KeelResult<Value>;

    /// Replace spec + metadata; status is preserved from the stored object
    async fn update(&self, kind: &str, object: Value) -> KeelResult<Value>;

    /// Replace status only
    async fn update_status(&self, kind: &str, object: Value) -> KeelResult<Value>;

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> KeelResult<()>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Typed facade over a `ClusterBackend`
#[derive(Clone)]
pub struct ClusterClient {
    backend: Arc<dyn ClusterBackend>,
    impersonate: Option<String>,
}

impl ClusterClient {
    pub fn new(backend: Arc<dyn ClusterBackend>) -> Self {
        Self {
            backend,
            impersonate: None,
        }
    }

    /// A client whose requests act as `system:serviceaccount:<ns>:<sa>`.
    ///
    /// Honors `SKIP_IMPERSONATION=true` for local development.
    pub fn impersonated(&self, namespace: &str, service_account: &str) -> Self {
        if std::env::var(SKIP_IMPERSONATION_ENV)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            tracing::debug!("impersonation disabled via {}", SKIP_IMPERSONATION_ENV);
            return self.clone();
        }
        Self {
            backend: self.backend.clone(),
            impersonate: Some(format!(
                "system:serviceaccount:{}:{}",
                namespace, service_account
            )),
        }
    }

    /// Identity stamped on requests, if any
    pub fn impersonation(&self) -> Option<&str> {
        self.impersonate.as_deref()
    }

    pub fn backend(&self) -> Arc<dyn ClusterBackend> {
        self.backend.clone()
    }

    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.backend.watch()
    }

    pub async fn get<R: Resource>(&self, namespace: &str, name: &str) -> KeelResult<Option<R>> {
        self.trace_identity();
        match self.backend.get(R::KIND, namespace, name).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_required<R: Resource>(&self, namespace: &str, name: &str) -> KeelResult<R> {
        self.get(namespace, name)
            .await?
            .ok_or_else(|| KeelError::not_found(R::KIND, format!("{}/{}", namespace, name)))
    }

    pub async fn list<R: Resource>(&self, namespace: &str) -> KeelResult<Vec<R>> {
        self.trace_identity();
        let values = self.backend.list(R::KIND, namespace).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(KeelError::from))
            .collect()
    }

    pub async fn list_all<R: Resource>(&self) -> KeelResult<Vec<R>> {
        let values = self.backend.list_all(R::KIND).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(KeelError::from))
            .collect()
    }

    pub async fn create<R: Resource>(&self, object: &R) -> KeelResult<R> {
        let value = self
            .backend
            .create(R::KIND, serde_json::to_value(object)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn update<R: Resource>(&self, object: &R) -> KeelResult<R> {
        let value = self
            .backend
            .update(R::KIND, serde_json::to_value(object)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn update_status<R: Resource>(&self, object: &R) -> KeelResult<R> {
        let value = self
            .backend
            .update_status(R::KIND, serde_json::to_value(object)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete<R: Resource>(&self, namespace: &str, name: &str) -> KeelResult<()> {
        self.backend.delete(R::KIND, namespace, name).await
    }

    fn trace_identity(&self) {
        if let Some(identity) = &self.impersonate {
            tracing::trace!(identity = %identity, "cluster read with impersonation");
        }
    }
}
