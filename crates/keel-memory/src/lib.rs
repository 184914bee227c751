//! Keel Memory - Session-scoped conversation store
//!
//! The HTTP client re-resolves the store's address on every call (the
//! backing service may move), rotating its base URL atomically and patching
//! the Memory resource status best-effort when the address changes. When a
//! query names no memory and the namespace has no `default` Memory, a no-op
//! store is used instead.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use keel_core::resources::Memory as MemoryResource;
use keel_core::{resolve_value, ClusterClient, KeelError, KeelResult, Message, WireMessage};

/// Seconds override for memory HTTP calls
pub const MEMORY_TIMEOUT_ENV: &str = "ARK_MEMORY_HTTP_TIMEOUT_SECONDS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MEMORY_NAME: &str = "default";

/// Conversation store contract
#[async_trait]
pub trait Memory: Send + Sync {
    async fn add_messages(&self, query_id: &str, messages: &[Message]) -> KeelResult<()>;

    async fn get_messages(&self) -> KeelResult<Vec<Message>>;
}

/// Store used when no memory is configured; discards adds, returns nothing.
#[derive(Default)]
pub struct NoopMemory;

#[async_trait]
impl Memory for NoopMemory {
    async fn add_messages(&self, _query_id: &str, _messages: &[Message]) -> KeelResult<()> {
        Ok(())
    }

    async fn get_messages(&self) -> KeelResult<Vec<Message>> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
struct AddMessagesRequest<'a> {
    session_id: &'a str,
    query_id: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct GetMessagesResponse {
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

#[derive(Deserialize)]
struct StoredMessage {
    message: Value,
}

/// HTTP-backed store bound to one Memory resource and one session
pub struct HttpMemory {
    cluster: ClusterClient,
    namespace: String,
    memory_name: String,
    session_id: String,
    base_url: ArcSwap<String>,
    traceparent: String,
    http: reqwest::Client,
}

impl HttpMemory {
    pub fn new(
        cluster: ClusterClient,
        namespace: impl Into<String>,
        memory_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> KeelResult<Self> {
        let timeout = std::env::var(MEMORY_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("keel/{}", keel_core::VERSION))
            .build()
            .map_err(|e| KeelError::runtime(format!("failed to build memory client: {}", e)))?;

        // Root trace context for this client's outbound calls.
        let traceparent = format!(
            "00-{}-{}-01",
            uuid::Uuid::new_v4().simple(),
            &uuid::Uuid::new_v4().simple().to_string()[..16]
        );

        Ok(Self {
            cluster,
            namespace: namespace.into(),
            memory_name: memory_name.into(),
            session_id: session_id.into(),
            base_url: ArcSwap::from_pointee(String::new()),
            traceparent,
            http,
        })
    }

    /// Re-resolve the address; rotate the base URL and patch status when it
    /// moved since the last call.
    async fn refresh_address(&self) -> KeelResult<String> {
        let resource: MemoryResource = self
            .cluster
            .get_required(&self.namespace, &self.memory_name)
            .await?;
        let address = resolve_value(&self.cluster, &self.namespace, &resource.spec.address).await?;

        let current = self.base_url.load();
        if **current != address {
            self.base_url.store(Arc::new(address.clone()));
            self.patch_status(resource, &address).await;
        }
        Ok(address)
    }

    /// Best-effort; a conflict here never fails the memory call.
    async fn patch_status(&self, mut resource: MemoryResource, address: &str) {
        let mut status = resource.status.clone().unwrap_or_default();
        if status.last_resolved_address.as_deref() == Some(address) {
            return;
        }
        status.last_resolved_address = Some(address.to_string());
        resource.status = Some(status);
        if let Err(e) = self.cluster.update_status(&resource).await {
            tracing::debug!(
                memory = %self.memory_name,
                "failed to record resolved memory address: {}",
                e
            );
        }
    }

    fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("traceparent", &self.traceparent)
            .header("X-Session-ID", &self.session_id)
    }
}

#[async_trait]
impl Memory for HttpMemory {
    async fn add_messages(&self, query_id: &str, messages: &[Message]) -> KeelResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let address = self.refresh_address().await?;

        let response = self
            .decorate(self.http.post(format!("{}/messages", address)))
            .json(&AddMessagesRequest {
                session_id: &self.session_id,
                query_id,
                messages,
            })
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("memory add failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(KeelError::runtime(format!(
                "memory add returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn get_messages(&self) -> KeelResult<Vec<Message>> {
        let address = self.refresh_address().await?;

        let response = self
            .decorate(self.http.get(format!("{}/messages", address)))
            .query(&[("session_id", self.session_id.as_str())])
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("memory get failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(KeelError::runtime(format!(
                "memory get returned {}",
                response.status()
            )));
        }

        let body: GetMessagesResponse = response
            .json()
            .await
            .map_err(|e| KeelError::runtime(format!("malformed memory response: {}", e)))?;

        Ok(body
            .messages
            .into_iter()
            .map(|stored| decode_message(stored.message))
            .collect())
    }
}

/// Decode a stored message, falling back to the flat {role, content} form.
///
/// Any JSON object carrying at least role and content decodes; unknown
/// roles become user messages.
fn decode_message(raw: Value) -> Message {
    match serde_json::from_value::<Message>(raw.clone()) {
        Ok(message) => message,
        Err(_) => {
            let wire = WireMessage {
                role: raw
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("user")
                    .to_string(),
                content: raw
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
            Message::from(wire)
        }
    }
}

/// Store for a query: the named memory, else the namespace `default`
/// memory, else a no-op.
pub async fn memory_for_query(
    cluster: &ClusterClient,
    namespace: &str,
    memory_ref: Option<&str>,
    session_id: &str,
) -> KeelResult<Arc<dyn Memory>> {
    let name = match memory_ref {
        Some(name) => name.to_string(),
        None => {
            let default: Option<MemoryResource> =
                cluster.get(namespace, DEFAULT_MEMORY_NAME).await?;
            match default {
                Some(_) => DEFAULT_MEMORY_NAME.to_string(),
                None => {
                    tracing::debug!(namespace, "no memory configured, using noop store");
                    return Ok(Arc::new(NoopMemory));
                }
            }
        }
    };

    // A named memory must exist.
    let _: MemoryResource = cluster.get_required(namespace, &name).await?;
    Ok(Arc::new(HttpMemory::new(
        cluster.clone(),
        namespace,
        name,
        session_id,
    )?))
}
