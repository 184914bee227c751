//! Keel MCP - Model Context Protocol client
//!
//! JSON-RPC 2.0 over HTTP (with an SSE response mode), plus a per-agent
//! connection pool with bounded-backoff acquisition.

pub mod client;
pub mod pool;

pub use client::{McpClient, McpToolInfo};
pub use pool::{is_retryable, McpPool};
