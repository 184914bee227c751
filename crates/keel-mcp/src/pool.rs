//! MCP client pool.
//!
//! Clients are acquired lazily per (namespace, server) and cached for the
//! lifetime of the owning agent. Connection setup uses bounded exponential
//! backoff on retryable errors: five attempts within a 120 s budget.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_core::{resolve_value, ClusterClient, KeelError, KeelResult, MCPServer};

use crate::client::McpClient;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BUDGET: Duration = Duration::from_secs(120);

/// Lazily-connected MCP clients keyed by (namespace, server name)
pub struct McpPool {
    cluster: ClusterClient,
    clients: DashMap<(String, String), Arc<McpClient>>,
}

impl McpPool {
    pub fn new(cluster: ClusterClient) -> Self {
        Self {
            cluster,
            clients: DashMap::new(),
        }
    }

    /// Pooled client for the named MCPServer, connecting on first use.
    pub async fn client(&self, namespace: &str, server_name: &str) -> KeelResult<Arc<McpClient>> {
        let key = (namespace.to_string(), server_name.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let server: MCPServer = self.cluster.get_required(namespace, server_name).await?;
        let address = resolve_value(&self.cluster, namespace, &server.spec.address).await?;

        let mut headers = Vec::with_capacity(server.spec.headers.len());
        for header in &server.spec.headers {
            let value = resolve_value(&self.cluster, namespace, &header.value).await?;
            headers.push((header.name.clone(), value));
        }

        let client = Arc::new(connect_with_backoff(&address, headers, server.spec.transport).await?);
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Drop a cached client so the next call reconnects.
    pub fn evict(&self, namespace: &str, server_name: &str) {
        self.clients
            .remove(&(namespace.to_string(), server_name.to_string()));
    }
}

async fn connect_with_backoff(
    address: &str,
    headers: Vec<(String, String)>,
    transport: keel_core::McpTransport,
) -> KeelResult<McpClient> {
    let started = Instant::now();
    let mut delay = Duration::from_secs(1);

    for attempt in 1..=CONNECT_ATTEMPTS {
        let client = McpClient::new(address, headers.clone(), transport)?;
        match client.initialize().await {
            Ok(()) => {
                tracing::debug!(address, attempt, "mcp server connected");
                return Ok(client);
            }
            Err(e) if is_retryable(&e) && attempt < CONNECT_ATTEMPTS => {
                if started.elapsed() + delay > CONNECT_BUDGET {
                    return Err(KeelError::timeout(format!(
                        "mcp connect budget exhausted for {}: {}",
                        address, e
                    )));
                }
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tracing::debug!(
                    address,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "mcp connect failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay + jitter).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(KeelError::retryable(format!(
        "mcp server {} unreachable after {} attempts",
        address, CONNECT_ATTEMPTS
    )))
}

/// Connection-class failures worth retrying; everything else fails fast.
pub fn is_retryable(error: &KeelError) -> bool {
    if !matches!(error, KeelError::Retryable(_)) {
        return false;
    }
    let text = error.to_string().to_lowercase();
    text.contains("connection refused")
        || text.contains("dns")
        || text.contains("timed out")
        || text.contains("timeout")
        || text.contains("temporary failure")
        || text.contains("connect")
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{InMemoryCluster, McpServerSpec, McpTransport, ObjectMeta, ValueSource};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&KeelError::retryable(
            "mcp request failed: connection refused"
        )));
        assert!(is_retryable(&KeelError::retryable(
            "temporary failure in name resolution"
        )));
        assert!(!is_retryable(&KeelError::tool("mcp server returned 500")));
        assert!(!is_retryable(&KeelError::validation("bad config")));
    }

    #[tokio::test]
    async fn test_pool_caches_clients() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let resource = MCPServer {
            api_version: "keel.dev/v1".to_string(),
            kind: "MCPServer".to_string(),
            metadata: ObjectMeta::named("files", "default"),
            spec: McpServerSpec {
                address: ValueSource::literal(server.uri()),
                headers: vec![],
                transport: McpTransport::Http,
            },
            status: None,
        };
        cluster.create(&resource).await.unwrap();

        let pool = McpPool::new(cluster);
        let first = pool.client("default", "files").await.unwrap();
        let second = pool.client("default", "files").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_missing_server_is_not_found() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let pool = McpPool::new(cluster);
        let err = match pool.client("default", "ghost").await {
            Err(err) => err,
            Ok(_) => panic!("expected pool.client to fail for a missing server"),
        };
        assert!(err.is_not_found());
    }
}
