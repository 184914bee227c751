//! Keel Tools - Tool registry and executors
//!
//! Each agent owns a registry mapping tool names to (definition, executor)
//! pairs: built-ins, HTTP fetchers, MCP server tools, plus the filter and
//! partial-parameter wrappers layered around them. The agent-as-tool
//! executor lives in keel-runtime to keep resolution lazy.

pub mod builtin;
pub mod filter;
pub mod http;
pub mod mcp;
pub mod partial;
pub mod registry;

pub use builtin::{register_builtin, NoopTool, TerminateTool, NOOP_TOOL, TERMINATE_TOOL};
pub use filter::{apply_filters, FilteredExecutor};
pub use http::{substitute_placeholders, HttpExecutor};
pub use mcp::McpExecutor;
pub use partial::PartialExecutor;
pub use registry::{definition_for, RegisteredTool, ToolExecutor, ToolRegistry};
