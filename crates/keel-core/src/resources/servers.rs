// Server resources - external endpoints agents reach during execution:
// MCP tool servers, A2A peers, and custom execution engines.

use serde::{Deserialize, Serialize};

use super::{default_api_version, AddressableStatus};
use crate::client::Resource;
use crate::meta::ObjectMeta;
use crate::resources::tool::HeaderValue;
use crate::value::ValueSource;

/// Annotations stamped on Agents discovered from an A2A server
pub const A2A_SERVER_NAME_ANNOTATION: &str = "keel.dev/a2a-server-name";
pub const A2A_SERVER_ADDRESS_ANNOTATION: &str = "keel.dev/a2a-server-address";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MCPServer {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "mcp_server_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: McpServerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressableStatus>,
}

fn mcp_server_kind() -> String {
    "MCPServer".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    pub address: ValueSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderValue>,
    #[serde(default)]
    pub transport: McpTransport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Http,
    Sse,
}

impl Resource for MCPServer {
    const KIND: &'static str = "MCPServer";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2AServer {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "a2a_server_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: A2AServerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressableStatus>,
}

fn a2a_server_kind() -> String {
    "A2AServer".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2AServerSpec {
    pub address: ValueSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderValue>,
    /// Seconds between discovery refreshes
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
}

fn default_poll_seconds() -> u64 {
    300
}

impl Resource for A2AServer {
    const KIND: &'static str = "A2AServer";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEngine {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "execution_engine_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ExecutionEngineSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressableStatus>,
}

fn execution_engine_kind() -> String {
    "ExecutionEngine".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEngineSpec {
    pub address: ValueSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderValue>,
}

impl Resource for ExecutionEngine {
    const KIND: &'static str = "ExecutionEngine";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mcp_server_yaml() {
        let server: MCPServer = serde_yaml::from_str(
            r#"
metadata: {name: files}
spec:
  address:
    valueFrom:
      serviceRef: {name: mcp-files, port: 8080}
  transport: sse
"#,
        )
        .unwrap();
        assert_eq!(server.spec.transport, McpTransport::Sse);
    }

    #[test]
    fn test_a2a_server_defaults() {
        let server: A2AServer = serde_yaml::from_str(
            "metadata: {name: peer}\nspec:\n  address: {value: \"http://peer:9000\"}\n",
        )
        .unwrap();
        assert_eq!(server.spec.poll_seconds, 300);
    }
}
