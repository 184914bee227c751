// Keel Core - Error types
//
// One error enum for the whole workspace. Variants map onto the failure
// kinds the controllers and runtimes distinguish: missing cluster objects,
// value-resolution failures, unready dependencies, retryable I/O,
// validation problems, timeouts, and cooperative cancellation.

use thiserror::Error;

/// Result alias used across all keel crates
pub type KeelResult<T> = Result<T, KeelError>;

/// Unified error type for the keel control plane
#[derive(Debug, Error)]
pub enum KeelError {
    /// A cluster resource does not exist
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// A referenced ConfigMap/Secret exists but lacks the requested key
    #[error("key \"{key}\" missing in {kind} \"{name}\"")]
    KeyMissing {
        kind: String,
        name: String,
        key: String,
    },

    /// A value source variant the resolver does not understand
    #[error("unsupported value source: {0}")]
    Unsupported(String),

    /// A value source could not be resolved
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// A dependency exists but is not in a ready-equivalent condition
    #[error("dependency not ready: {0}")]
    Unavailable(String),

    /// Missing or contradictory configuration
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic-concurrency conflict on a cluster write
    #[error("conflict writing {0}")]
    Conflict(String),

    /// Network-class failure that may succeed on retry
    #[error("retryable: {0}")]
    Retryable(String),

    /// A deadline elapsed
    #[error("timed out: {0}")]
    Timeout(String),

    /// Cooperative cancellation; never reported as an error phase
    #[error("canceled")]
    Canceled,

    /// LLM provider failure
    #[error("model provider error: {0}")]
    Provider(String),

    /// Tool execution failure
    #[error("tool error: {0}")]
    Tool(String),

    /// Anything else that went wrong at execution time
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeelError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn key_missing(
        kind: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::KeyMissing {
            kind: kind.into(),
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// True for NotFound (dependencies treat missing objects as transient)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for conflicts that should be retried with fresh state
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// True when the failure is cooperative cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
