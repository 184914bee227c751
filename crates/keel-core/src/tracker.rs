// Keel Core - Operation tracking and token accounting
//
// Every substantive operation is wrapped in an OperationTracker that emits a
// `<Operation>Start` event on construction and a `<Operation>Complete` or
// `<Operation>Error` event on completion, with duration and optional token
// usage. Completion usage flows into the query-scoped TokenUsageCollector.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use crate::error::KeelError;
use crate::event::EventRecorder;
use crate::usage::TokenUsage;

/// Operations tracked across the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ModelProbe,
    ModelCall,
    MemoryAddMessages,
    A2ACall,
    ToolCall,
    TeamExecution,
    QueryResolve,
    Evaluation,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelProbe => "ModelProbe",
            Self::ModelCall => "ModelCall",
            Self::MemoryAddMessages => "MemoryAddMessages",
            Self::A2ACall => "A2ACall",
            Self::ToolCall => "ToolCall",
            Self::TeamExecution => "TeamExecution",
            Self::QueryResolve => "QueryResolve",
            Self::Evaluation => "Evaluation",
        }
    }
}

/// Thread-safe token accumulator owned by one query execution
#[derive(Clone, Default)]
pub struct TokenUsageCollector {
    total: Arc<Mutex<TokenUsage>>,
}

impl TokenUsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, usage: TokenUsage) {
        if usage.is_zero() {
            return;
        }
        self.total.lock().add(usage);
    }

    /// Current accumulated total
    pub fn total(&self) -> TokenUsage {
        *self.total.lock()
    }

    /// Point-in-time snapshot for later delta attribution
    pub fn snapshot(&self) -> TokenUsage {
        self.total()
    }

    /// Tokens accumulated since `snapshot`
    pub fn delta_since(&self, snapshot: TokenUsage) -> TokenUsage {
        self.total().delta_from(snapshot)
    }
}

/// Scoped tracker for one operation against one object
pub struct OperationTracker {
    operation: Operation,
    recorder: EventRecorder,
    collector: Option<TokenUsageCollector>,
    kind: String,
    object: String,
    started: Instant,
}

impl OperationTracker {
    /// Emits `<Operation>Start` and begins timing.
    pub fn start(
        recorder: &EventRecorder,
        collector: Option<&TokenUsageCollector>,
        operation: Operation,
        kind: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        let object = object.into();
        recorder.normal(
            &kind,
            &object,
            format!("{}Start", operation.as_str()),
            format!("{} started", operation.as_str()),
        );
        Self {
            operation,
            recorder: recorder.clone(),
            collector: collector.cloned(),
            kind,
            object,
            started: Instant::now(),
        }
    }

    /// Emits `<Operation>Complete`, forwarding usage to the collector.
    pub fn complete(self, usage: Option<TokenUsage>) {
        let duration = self.started.elapsed();
        if let (Some(collector), Some(usage)) = (&self.collector, usage) {
            collector.add(usage);
        }

        let mut message = format!(
            "{} completed in {}ms",
            self.operation.as_str(),
            duration.as_millis()
        );
        if let Some(usage) = usage {
            message.push_str(&format!(" ({} tokens)", usage.total_tokens));
        }
        self.recorder.normal(
            &self.kind,
            &self.object,
            format!("{}Complete", self.operation.as_str()),
            message,
        );
    }

    /// Emits `<Operation>Error` with the failure message.
    pub fn fail(self, error: &KeelError) {
        let duration = self.started.elapsed();
        self.recorder.warning(
            &self.kind,
            &self.object,
            format!("{}Error", self.operation.as_str()),
            format!(
                "{} failed after {}ms: {}",
                self.operation.as_str(),
                duration.as_millis(),
                error
            ),
        );
    }
}
