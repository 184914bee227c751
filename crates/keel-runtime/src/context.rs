//! Execution context threaded through agent, team, and query execution.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use keel_core::{ClusterClient, EventRecorder, KeelError, KeelResult, TokenUsageCollector};
use keel_mcp::McpPool;

/// Shared state for one query execution (or one standalone agent run).
///
/// Tasks never share mutable state except through the token collector and
/// the event recorder; everything else here is read-only or internally
/// synchronized.
#[derive(Clone)]
pub struct ExecContext {
    pub cluster: ClusterClient,
    pub namespace: String,
    pub recorder: EventRecorder,
    pub collector: TokenUsageCollector,
    pub cancel: CancellationToken,
    /// Parameters declared on the enclosing query
    pub query_parameters: HashMap<String, String>,
    pub session_id: String,
    /// Name of the enclosing query; used for memory writes and spans
    pub query_name: String,
    pub mcp_pool: Arc<McpPool>,
}

impl ExecContext {
    pub fn new(cluster: ClusterClient, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            mcp_pool: Arc::new(McpPool::new(cluster.clone())),
            cluster,
            namespace,
            recorder: EventRecorder::new(),
            collector: TokenUsageCollector::new(),
            cancel: CancellationToken::new(),
            query_parameters: HashMap::new(),
            session_id: String::new(),
            query_name: String::new(),
        }
    }

    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_query(
        mut self,
        query_name: impl Into<String>,
        session_id: impl Into<String>,
        parameters: HashMap<String, String>,
    ) -> Self {
        self.query_name = query_name.into();
        self.session_id = session_id.into();
        self.query_parameters = parameters;
        self
    }

    /// Cooperative cancellation check at suspension points.
    pub fn check_canceled(&self) -> KeelResult<()> {
        if self.cancel.is_cancelled() {
            Err(KeelError::Canceled)
        } else {
            Ok(())
        }
    }
}
