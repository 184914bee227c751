// Keel Core - Foundation types for the keel control plane
//
// This crate holds the resource data model, the cluster-API client contract
// (with an in-memory backend), value-source resolution, and the event /
// token-accounting plumbing shared by the runtimes and controllers.

pub mod client;
pub mod cluster;
pub mod condition;
pub mod duration;
pub mod error;
pub mod event;
pub mod message;
pub mod meta;
pub mod resources;
pub mod tooling;
pub mod tracker;
pub mod usage;
pub mod value;

// Re-export core types
pub use client::{
    ClusterBackend, ClusterClient, Resource, WatchEvent, WatchEventType, SKIP_IMPERSONATION_ENV,
};
pub use cluster::InMemoryCluster;
pub use condition::{
    get_condition, is_condition_true, set_condition, Condition, ConditionStatus,
    CONDITION_AVAILABLE, CONDITION_MODEL_AVAILABLE, CONDITION_READY,
};
pub use duration::{format_duration, parse_duration};
pub use error::{KeelError, KeelResult};
pub use event::{Event, EventRecorder, EventType};
pub use message::{FunctionCall, Message, ToolCallRequest, WireMessage};
pub use meta::{LabelSelector, NamespacedName, ObjectMeta, OwnerReference};
pub use resources::*;
pub use tooling::{ToolCall, ToolDefinition, ToolResult};
pub use tracker::{Operation, OperationTracker, TokenUsageCollector};
pub use usage::TokenUsage;
pub use value::{
    resolve_parameters, resolve_value, KeySelector, Parameter, ParameterFrom, QueryParameterRef,
    ServiceRef, ValueFrom, ValueSource,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable read into startup event metadata
pub const VERSION_ENV: &str = "VERSION";
