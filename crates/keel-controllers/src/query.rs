//! Query controller.
//!
//! Phase machine: absent -> running -> (evaluating ->) done | error, with
//! canceled reachable via spec.cancel. Execution happens in a background
//! task registered in the operation map so deletion, finalization, and
//! explicit cancel can interrupt it; the task never writes status after its
//! token is cancelled. A TTL deletes expired queries on every reconcile.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;

use keel_core::{
    format_duration, parse_duration, resolve_parameters, set_condition, ClusterClient, Condition,
    ConditionStatus, EventRecorder, KeelError, KeelResult, NamespacedName, Operation,
    OperationTracker, Query, QueryEvaluationResult, QueryPhase, QueryStatus, CONDITION_READY,
};
use keel_runtime::{
    EvaluationRequest, EvaluatorClient, ExecContext, QueryExecutor, DEFAULT_EVALUATION_TIMEOUT,
};

use crate::manager::{Action, Reconciler, Request};
use crate::operations::OperationMap;
use crate::status::update_status_with_retry;

pub const QUERY_FINALIZER: &str = "keel.dev/query-finalizer";

pub struct QueryReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
    operations: OperationMap,
}

impl QueryReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder, operations: OperationMap) -> Self {
        Self {
            cluster,
            recorder,
            operations,
        }
    }
}

#[async_trait]
impl Reconciler for QueryReconciler {
    fn kind(&self) -> &'static str {
        "Query"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(query) = self
            .cluster
            .get::<Query>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let key = NamespacedName::new(&request.namespace, &request.name);
        let object = key.to_string();

        // Expired queries are deleted; no phase transitions afterwards. An
        // unexpired TTL schedules the reconcile that will enforce it.
        let mut fallback = Action::done();
        if let Some(ttl) = query.spec.ttl.as_deref().filter(|t| !t.is_empty()) {
            let ttl = parse_duration(ttl)?;
            if let Some(created) = query.metadata.creation_timestamp {
                let age = chrono::Utc::now().signed_duration_since(created);
                let remaining = ttl
                    .checked_sub(age.to_std().unwrap_or_default())
                    .unwrap_or_default();
                if remaining.is_zero() {
                    self.recorder
                        .normal("Query", &object, "Expired", "ttl elapsed, deleting");
                    self.operations.cancel(&key);
                    self.cluster
                        .delete::<Query>(&request.namespace, &request.name)
                        .await?;
                    return Ok(Action::done());
                }
                fallback = Action::requeue_after(remaining + std::time::Duration::from_millis(100));
            }
        }

        // Deletion: cancel in-flight work, then release the finalizer.
        if query.metadata.is_deleting() {
            self.operations.cancel(&key);
            if query.metadata.has_finalizer(QUERY_FINALIZER) {
                let mut fresh: Query = self
                    .cluster
                    .get_required(&request.namespace, &request.name)
                    .await?;
                fresh.metadata.finalizers.retain(|f| f != QUERY_FINALIZER);
                self.cluster.update(&fresh).await?;
            }
            return Ok(Action::done());
        }

        // Terminal phases never transition again.
        if query.is_terminal() {
            self.operations.remove(&key);
            return Ok(fallback);
        }

        if query.spec.cancel {
            let was_running = self.operations.cancel(&key);
            self.recorder.normal(
                "Query",
                &object,
                "Canceled",
                if was_running {
                    "canceled in-flight execution"
                } else {
                    "canceled before execution"
                },
            );
            update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
                |query: &mut Query| {
                    let mut status = query.status();
                    if status.phase.is_some_and(|p| p.is_terminal()) {
                        return false;
                    }
                    status.phase = Some(QueryPhase::Canceled);
                    query.status = Some(status);
                    true
                }
            })
            .await?;
            return Ok(Action::done());
        }

        match query.phase() {
            None => {
                if !query.metadata.has_finalizer(QUERY_FINALIZER) {
                    let mut fresh: Query = self
                        .cluster
                        .get_required(&request.namespace, &request.name)
                        .await?;
                    fresh
                        .metadata
                        .finalizers
                        .push(QUERY_FINALIZER.to_string());
                    self.cluster.update(&fresh).await?;
                }

                let generation = query.metadata.generation;
                update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
                    move |query: &mut Query| {
                        let mut status = query.status();
                        status.phase = Some(QueryPhase::Running);
                        set_condition(
                            &mut status.conditions,
                            Condition::new(
                                CONDITION_READY,
                                ConditionStatus::Unknown,
                                "Running",
                                "execution started",
                            ),
                            generation,
                        );
                        query.status = Some(status);
                        true
                    }
                })
                .await?;

                self.spawn_execution(query);
            }
            Some(QueryPhase::Running) | Some(QueryPhase::Evaluating) => {
                // Process restart recovery: the operation map is
                // non-authoritative, respawn lost work.
                if !self.operations.contains(&key) {
                    self.spawn_execution(query);
                }
            }
            Some(_) => {}
        }

        Ok(fallback)
    }
}

impl QueryReconciler {
    fn spawn_execution(&self, query: Query) {
        let key = query.metadata.namespaced_name();
        let token = self.operations.register(key.clone());
        let namespace = query.metadata.namespace.clone();

        let cluster = match &query.spec.service_account {
            Some(service_account) => self.cluster.impersonated(&namespace, service_account),
            None => self.cluster.clone(),
        };
        let recorder = self.recorder.clone();
        let operations = self.operations.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let object = key.to_string();

            let parameters = match resolve_parameters(
                &cluster,
                &namespace,
                &query.spec.parameters,
                &HashMap::new(),
            )
            .await
            {
                Ok(parameters) => parameters,
                Err(e) => {
                    write_terminal(&cluster, &key, &token, QueryPhase::Error, |status| {
                        status.message = Some(e.to_string());
                    })
                    .await;
                    operations.remove(&key);
                    return;
                }
            };

            let ctx = ExecContext::new(cluster.clone(), namespace.clone())
                .with_recorder(recorder.clone())
                .with_cancel(token.clone())
                .with_query(
                    query.metadata.name.clone(),
                    query.session_id().to_string(),
                    parameters,
                );

            let result = QueryExecutor::execute(&ctx, &query).await;

            if token.is_cancelled() {
                operations.remove(&key);
                return;
            }

            let usage = ctx.collector.total();
            let duration = format_duration(started.elapsed());

            match result {
                Err(KeelError::Canceled) => {}
                Err(e) => {
                    recorder.warning("Query", &object, "ExecutionFailed", e.to_string());
                    write_terminal(&cluster, &key, &token, QueryPhase::Error, |status| {
                        status.message = Some(e.to_string());
                        status.token_usage = Some(usage);
                        status.duration = Some(duration.clone());
                    })
                    .await;
                }
                Ok(outcome) => {
                    if let Some(error) = outcome.error {
                        recorder.warning("Query", &object, "TargetFailed", error.clone());
                        write_terminal(&cluster, &key, &token, QueryPhase::Error, |status| {
                            status.responses = outcome.responses.clone();
                            status.message = Some(error.clone());
                            status.token_usage = Some(usage);
                            status.duration = Some(duration.clone());
                        })
                        .await;
                    } else {
                        finish_with_evaluation(
                            &cluster, &recorder, &ctx, &query, &key, &token, outcome.responses,
                            started,
                        )
                        .await;
                    }
                }
            }

            operations.remove(&key);
        });
    }
}

/// After a clean fan-out: run matched evaluators (if any) through the
/// evaluating phase, then settle in done.
#[allow(clippy::too_many_arguments)]
async fn finish_with_evaluation(
    cluster: &ClusterClient,
    recorder: &EventRecorder,
    ctx: &ExecContext,
    query: &Query,
    key: &NamespacedName,
    token: &tokio_util::sync::CancellationToken,
    responses: Vec<keel_core::QueryResponse>,
    started: Instant,
) {
    let namespace = &query.metadata.namespace;
    let object = key.to_string();

    let evaluators = match QueryExecutor::resolve_evaluators(cluster, namespace, &query.spec).await
    {
        Ok(evaluators) => evaluators,
        Err(e) => {
            recorder.warning("Query", &object, "EvaluatorResolutionFailed", e.to_string());
            write_terminal(cluster, key, token, QueryPhase::Error, |status| {
                status.responses = responses.clone();
                status.message = Some(e.to_string());
                status.token_usage = Some(ctx.collector.total());
                status.duration = Some(format_duration(started.elapsed()));
            })
            .await;
            return;
        }
    };

    if evaluators.is_empty() {
        write_terminal(cluster, key, token, QueryPhase::Done, |status| {
            status.responses = responses.clone();
            status.message = None;
            status.token_usage = Some(ctx.collector.total());
            status.duration = Some(format_duration(started.elapsed()));
        })
        .await;
        return;
    }

    write_phase(cluster, key, token, QueryPhase::Evaluating, |status| {
        status.responses = responses.clone();
        status.token_usage = Some(ctx.collector.total());
    })
    .await;

    let client = match EvaluatorClient::new() {
        Ok(client) => client,
        Err(e) => {
            write_terminal(cluster, key, token, QueryPhase::Error, |status| {
                status.message = Some(e.to_string());
            })
            .await;
            return;
        }
    };

    let mut evaluations = Vec::new();
    for evaluator in &evaluators {
        if token.is_cancelled() {
            return;
        }
        let evaluator_name = evaluator.metadata.name.clone();

        let tracker = OperationTracker::start(
            recorder,
            Some(&ctx.collector),
            Operation::Evaluation,
            "Query",
            &object,
        );
        let result = evaluate_query(cluster, &client, namespace, evaluator, query, &responses)
            .await;
        match result {
            Ok((score, passed, usage)) => {
                tracker.complete(usage);
                evaluations.push(QueryEvaluationResult {
                    evaluator_name,
                    score,
                    passed,
                });
            }
            Err(e) => {
                tracker.fail(&e);
                recorder.warning(
                    "Query",
                    &object,
                    "EvaluationFailed",
                    format!("evaluator {}: {}", evaluator_name, e),
                );
            }
        }
    }

    write_terminal(cluster, key, token, QueryPhase::Done, |status| {
        status.responses = responses.clone();
        status.evaluations = evaluations.clone();
        status.message = None;
        status.token_usage = Some(ctx.collector.total());
        status.duration = Some(format_duration(started.elapsed()));
    })
    .await;
}

async fn evaluate_query(
    cluster: &ClusterClient,
    client: &EvaluatorClient,
    namespace: &str,
    evaluator: &keel_core::Evaluator,
    query: &Query,
    responses: &[keel_core::QueryResponse],
) -> KeelResult<(Option<String>, Option<bool>, Option<keel_core::TokenUsage>)> {
    let address =
        keel_core::resolve_value(cluster, namespace, &evaluator.spec.address).await?;
    let parameters = resolve_parameters(
        cluster,
        namespace,
        &evaluator.spec.parameters,
        &HashMap::new(),
    )
    .await?;

    let request = EvaluationRequest {
        eval_type: "query".to_string(),
        config: serde_json::json!({
            "queryRef": {"name": query.metadata.name, "namespace": namespace},
            "input": query.spec.input,
            "responses": responses,
        }),
        parameters,
        evaluator_name: evaluator.metadata.name.clone(),
    };

    let response = client
        .evaluate(&address, &request, DEFAULT_EVALUATION_TIMEOUT)
        .await?;
    Ok((response.score, response.passed, response.token_usage))
}

/// Guarded terminal write: skipped when cancelled or already terminal.
async fn write_terminal<F>(
    cluster: &ClusterClient,
    key: &NamespacedName,
    token: &tokio_util::sync::CancellationToken,
    phase: QueryPhase,
    fill: F,
) where
    F: Fn(&mut QueryStatus),
{
    write_phase(cluster, key, token, phase, fill).await;
}

async fn write_phase<F>(
    cluster: &ClusterClient,
    key: &NamespacedName,
    token: &tokio_util::sync::CancellationToken,
    phase: QueryPhase,
    fill: F,
) where
    F: Fn(&mut QueryStatus),
{
    if token.is_cancelled() {
        return;
    }
    let result = update_status_with_retry(cluster, &key.namespace, &key.name, {
        |query: &mut Query| {
            let mut status = query.status();
            if status.phase.is_some_and(|p| p.is_terminal()) {
                return false;
            }
            status.phase = Some(phase);
            fill(&mut status);
            query.status = Some(status);
            true
        }
    })
    .await;
    if let Err(e) = result {
        tracing::warn!(query = %key, "failed to write query status: {}", e);
    }
}
