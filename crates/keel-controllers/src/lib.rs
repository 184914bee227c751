//! Keel Controllers - Reconciliation core
//!
//! One level-triggered reconciler per resource kind, a controller manager
//! that serializes per-key work across a parallel worker pool, and the
//! process-wide operation map that makes in-flight query executions
//! cancellable.

pub mod manager;
pub mod operations;
pub mod status;

mod addressable;

pub mod a2a_server;
pub mod agent;
pub mod evaluation;
pub mod evaluator;
pub mod execution_engine;
pub mod mcp_server;
pub mod memory;
pub mod model;
pub mod query;
pub mod team;
pub mod tool;

pub use a2a_server::A2AServerReconciler;
pub use agent::AgentReconciler;
pub use evaluation::EvaluationReconciler;
pub use evaluator::EvaluatorReconciler;
pub use execution_engine::ExecutionEngineReconciler;
pub use manager::{Action, ControllerManager, Reconciler, Request};
pub use mcp_server::McpServerReconciler;
pub use memory::MemoryReconciler;
pub use model::ModelReconciler;
pub use operations::OperationMap;
pub use query::{QueryReconciler, QUERY_FINALIZER};
pub use status::update_status_with_retry;
pub use team::TeamReconciler;
pub use tool::ToolReconciler;

use std::sync::Arc;

use keel_core::{ClusterClient, EventRecorder, KeelResult};

/// Wire up every controller against one cluster client.
pub fn default_manager(
    cluster: ClusterClient,
    recorder: EventRecorder,
    operations: OperationMap,
    workers: usize,
) -> KeelResult<ControllerManager> {
    let mut manager = ControllerManager::new(cluster.clone()).with_workers(workers);

    manager.register(Arc::new(ModelReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(AgentReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(TeamReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(ToolReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(MemoryReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(McpServerReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(A2AServerReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(ExecutionEngineReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(EvaluatorReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )));
    manager.register(Arc::new(EvaluationReconciler::new(
        cluster.clone(),
        recorder.clone(),
    )?));
    manager.register(Arc::new(QueryReconciler::new(
        cluster,
        recorder,
        operations,
    )));

    Ok(manager)
}
