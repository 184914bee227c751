//! Keel Runtime - Query execution engine
//!
//! Composes the agent tool-loop, team strategies, A2A and execution-engine
//! delegation, evaluator calls, and the per-query fan-out with
//! cancellation, timeout, and token-accounting semantics.

pub mod a2a;
pub mod agent;
pub mod agent_tool;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod query;
pub mod team;

mod toolset;

pub use a2a::{A2AClient, AgentCard, AgentSkill};
pub use agent::{AgentOutcome, AgentRuntime, MAX_ITERATIONS};
pub use agent_tool::AgentToolExecutor;
pub use context::ExecContext;
pub use engine::EngineClient;
pub use evaluator::{
    merge_parameters, validate_model_namespace, EvaluationRequest, EvaluationResponse,
    EvaluatorClient, BASELINE_TIMEOUT_FLOOR, DEFAULT_EVALUATION_TIMEOUT,
};
pub use query::{QueryExecutor, QueryOutcome, DEFAULT_QUERY_TIMEOUT};
pub use team::{TeamRuntime, DEFAULT_MAX_TURNS};
