//! End-to-end controller scenarios against the in-memory cluster and
//! wiremock model/evaluator servers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keel_controllers::{default_manager, OperationMap};
use keel_core::{
    Agent, AgentPhase, ClusterClient, Evaluation, EvaluationPhase, EventRecorder,
    InMemoryCluster, Model, Query, QueryPhase, Resource, A2AServer,
};

struct Harness {
    cluster: ClusterClient,
    recorder: EventRecorder,
    shutdown: CancellationToken,
}

impl Harness {
    async fn start() -> Self {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let recorder = EventRecorder::new();
        let operations = OperationMap::new();
        let shutdown = CancellationToken::new();

        let manager =
            default_manager(cluster.clone(), recorder.clone(), operations, 4).unwrap();
        tokio::spawn(manager.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            cluster,
            recorder,
            shutdown,
        }
    }

    async fn create<R: Resource>(&self, yaml: &str) -> R {
        let resource: R = serde_yaml::from_str(yaml).unwrap();
        self.cluster.create(&resource).await.unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll until the predicate future yields Some, or fail after ~10s.
async fn wait_for<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..200 {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

async fn mount_openai(server: &MockServer, content: &str) {
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })))
        .mount(server)
        .await;
}

fn model_yaml(name: &str, base_url: &str) -> String {
    format!(
        r#"
metadata: {{name: {}}}
spec:
  type: openai
  model: {{value: gpt-4o}}
  config:
    openai:
      baseUrl: {{value: "{}"}}
      apiKey: {{value: test-key}}
"#,
        name, base_url
    )
}

#[tokio::test]
async fn test_dependency_flip_drives_agent_ready() {
    let harness = Harness::start().await;

    harness
        .create::<Agent>("metadata: {name: a}\nspec:\n  prompt: hi\n  modelRef: {name: m}\n")
        .await;

    // No model yet: the agent settles in pending.
    let agent = wait_for(|| async {
        harness
            .cluster
            .get::<Agent>("default", "a")
            .await
            .unwrap()
            .filter(|a| a.status.is_some() && !a.status().conditions.is_empty())
    })
    .await;
    assert_eq!(agent.status().phase, AgentPhase::Pending);

    // Model appears and probes successfully; the watch flips the agent.
    let server = MockServer::start().await;
    mount_openai(&server, "ok").await;
    harness.create::<Model>(&model_yaml("m", &server.uri())).await;

    wait_for(|| async {
        harness
            .cluster
            .get::<Agent>("default", "a")
            .await
            .unwrap()
            .filter(|a| a.status().phase == AgentPhase::Ready)
    })
    .await;
}

#[tokio::test]
async fn test_query_executes_to_done() {
    let harness = Harness::start().await;
    let server = MockServer::start().await;
    mount_openai(&server, "ok").await;

    harness
        .create::<Model>(&model_yaml("default", &server.uri()))
        .await;
    harness
        .create::<Agent>(
            r#"
metadata: {name: echoer}
spec:
  prompt: "Echo: {{x}}"
  parameters:
    - {name: x, value: hi}
"#,
        )
        .await;

    harness
        .create::<Query>(
            "metadata: {name: q}\nspec:\n  input: go\n  targets:\n    - {type: agent, name: echoer}\n",
        )
        .await;

    let query = wait_for(|| async {
        harness
            .cluster
            .get::<Query>("default", "q")
            .await
            .unwrap()
            .filter(|q| q.phase() == Some(QueryPhase::Done))
    })
    .await;

    let status = query.status();
    assert_eq!(status.responses.len(), 1);
    assert_eq!(status.responses[0].content, "ok");
    assert!(status.token_usage.unwrap().total_tokens > 0);
    assert!(status.duration.is_some());
}

#[tokio::test]
async fn test_query_cancel_is_prompt_and_terminal() {
    let harness = Harness::start().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;
    // Slow completion keeps the query in running.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(20))
                .set_body_json(json!({
                    "choices": [{"message": {"role": "assistant", "content": "late"}}],
                    "usage": {"prompt_tokens": 1, "completion_tokens": 1}
                })),
        )
        .mount(&server)
        .await;

    harness
        .create::<Model>(&model_yaml("default", &server.uri()))
        .await;
    harness
        .create::<Agent>("metadata: {name: slow}\nspec: {prompt: wait}\n")
        .await;
    harness
        .create::<Query>(
            "metadata: {name: q}\nspec:\n  input: go\n  targets:\n    - {type: agent, name: slow}\n",
        )
        .await;

    wait_for(|| async {
        harness
            .cluster
            .get::<Query>("default", "q")
            .await
            .unwrap()
            .filter(|q| q.phase() == Some(QueryPhase::Running))
    })
    .await;

    let mut fresh: Query = harness.cluster.get_required("default", "q").await.unwrap();
    fresh.spec.cancel = true;
    harness.cluster.update(&fresh).await.unwrap();

    let query = wait_for(|| async {
        harness
            .cluster
            .get::<Query>("default", "q")
            .await
            .unwrap()
            .filter(|q| q.phase() == Some(QueryPhase::Canceled))
    })
    .await;
    assert!(query.status().responses.is_empty());

    let requests_after_cancel = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        requests_after_cancel,
        "no additional model calls after cancel"
    );
}

#[tokio::test]
async fn test_terminal_query_never_transitions_again() {
    let harness = Harness::start().await;
    let server = MockServer::start().await;
    mount_openai(&server, "ok").await;

    harness
        .create::<Model>(&model_yaml("default", &server.uri()))
        .await;
    harness
        .create::<Agent>("metadata: {name: a}\nspec: {prompt: hi}\n")
        .await;
    harness
        .create::<Query>(
            "metadata: {name: q}\nspec:\n  input: go\n  targets:\n    - {type: agent, name: a}\n",
        )
        .await;

    let done = wait_for(|| async {
        harness
            .cluster
            .get::<Query>("default", "q")
            .await
            .unwrap()
            .filter(|q| q.phase() == Some(QueryPhase::Done))
    })
    .await;
    let responses_before = done.status().responses.len();

    // A cancel request on a terminal query is a no-op.
    let mut fresh: Query = harness.cluster.get_required("default", "q").await.unwrap();
    fresh.spec.cancel = true;
    harness.cluster.update(&fresh).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after: Query = harness.cluster.get_required("default", "q").await.unwrap();
    assert_eq!(after.phase(), Some(QueryPhase::Done));
    assert_eq!(after.status().responses.len(), responses_before);
}

#[tokio::test]
async fn test_query_ttl_expiry_deletes() {
    let harness = Harness::start().await;
    let server = MockServer::start().await;
    mount_openai(&server, "ok").await;

    harness
        .create::<Model>(&model_yaml("default", &server.uri()))
        .await;
    harness
        .create::<Agent>("metadata: {name: a}\nspec: {prompt: hi}\n")
        .await;
    harness
        .create::<Query>(
            "metadata: {name: q}\nspec:\n  input: go\n  ttl: 1s\n  targets:\n    - {type: agent, name: a}\n",
        )
        .await;

    wait_for(|| async {
        match harness.cluster.get::<Query>("default", "q").await.unwrap() {
            None => Some(()),
            Some(_) => None,
        }
    })
    .await;
}

#[tokio::test]
async fn test_a2a_discovery_and_cascade_delete() {
    let harness = Harness::start().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/agent.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "peer",
            "description": "remote agents",
            "skills": [
                {"id": "s1", "name": "adder", "description": "adds"},
                {"id": "s2", "name": "divider", "description": "divides"}
            ]
        })))
        .mount(&server)
        .await;

    harness
        .create::<A2AServer>(&format!(
            "metadata: {{name: peer}}\nspec:\n  address: {{value: \"{}\"}}\n",
            server.uri()
        ))
        .await;

    wait_for(|| async {
        let adder = harness
            .cluster
            .get::<Agent>("default", "peer-adder")
            .await
            .unwrap();
        let divider = harness
            .cluster
            .get::<Agent>("default", "peer-divider")
            .await
            .unwrap();
        (adder.is_some() && divider.is_some()).then_some(())
    })
    .await;

    let adder: Agent = harness
        .cluster
        .get_required("default", "peer-adder")
        .await
        .unwrap();
    assert!(adder.metadata.is_owned_by("A2AServer", "peer"));
    assert!(adder.uses_a2a());

    // An unrelated agent must survive the cascade.
    harness
        .create::<Agent>("metadata: {name: local}\nspec: {prompt: hi}\n")
        .await;

    harness
        .cluster
        .delete::<A2AServer>("default", "peer")
        .await
        .unwrap();

    wait_for(|| async {
        let adder = harness
            .cluster
            .get::<Agent>("default", "peer-adder")
            .await
            .unwrap();
        adder.is_none().then_some(())
    })
    .await;
    assert!(harness
        .cluster
        .get::<Agent>("default", "local")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_batch_evaluation_aggregation() {
    let harness = Harness::start().await;
    let server = MockServer::start().await;

    for (input, score, passed) in [("one", "0.9", true), ("two", "1.0", true), ("three", "0.2", false)] {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"config": {"input": input}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "score": score,
                "passed": passed,
            })))
            .mount(&server)
            .await;
    }

    harness
        .create::<keel_core::Evaluator>(&format!(
            "metadata: {{name: judge}}\nspec:\n  address: {{value: \"{}\"}}\n",
            server.uri()
        ))
        .await;

    harness
        .create::<Evaluation>(
            r#"
metadata: {name: suite}
spec:
  type: batch
  evaluator: {name: judge}
  config:
    evaluations:
      - {name: c1, type: direct, config: {input: one, output: "1"}}
      - {name: c2, type: direct, config: {input: two, output: "2"}}
      - {name: c3, type: direct, config: {input: three, output: "3"}}
"#,
        )
        .await;

    let parent = wait_for(|| async {
        harness
            .cluster
            .get::<Evaluation>("default", "suite")
            .await
            .unwrap()
            .filter(|e| e.phase() == Some(EvaluationPhase::Done))
    })
    .await;

    let status = parent.status();
    assert_eq!(status.score.as_deref(), Some("0.700"));
    assert_eq!(status.passed, Some(false));

    // Children carry the parent label and owner reference.
    let child: Evaluation = harness
        .cluster
        .get_required("default", "suite-c1")
        .await
        .unwrap();
    assert_eq!(
        child.metadata.labels.get("parent-evaluation").map(String::as_str),
        Some("suite")
    );
    assert!(child.metadata.is_owned_by("Evaluation", "suite"));
}

#[tokio::test]
async fn test_evaluator_auto_evaluation_of_matching_queries() {
    let harness = Harness::start().await;
    let model_server = MockServer::start().await;
    mount_openai(&model_server, "answer").await;
    let eval_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "score": "0.9", "passed": true
        })))
        .mount(&eval_server)
        .await;

    harness
        .create::<Model>(&model_yaml("default", &model_server.uri()))
        .await;
    harness
        .create::<Agent>("metadata: {name: a}\nspec: {prompt: hi}\n")
        .await;
    harness
        .create::<keel_core::Evaluator>(&format!(
            r#"
metadata: {{name: auto}}
spec:
  address: {{value: "{}"}}
  selector:
    matchLabels: {{evaluate: "yes"}}
"#,
            eval_server.uri()
        ))
        .await;

    harness
        .create::<Query>(
            r#"
metadata:
  name: q
  labels: {evaluate: "yes"}
spec:
  input: go
  targets:
    - {type: agent, name: a}
"#,
        )
        .await;

    // Query finishes, the evaluator notices, an Evaluation appears and runs.
    let evaluation = wait_for(|| async {
        harness
            .cluster
            .get::<Evaluation>("default", "q-auto")
            .await
            .unwrap()
            .filter(|e| e.phase() == Some(EvaluationPhase::Done))
    })
    .await;
    assert_eq!(evaluation.status().score.as_deref(), Some("0.9"));
    assert!(evaluation.metadata.is_owned_by("Query", "q"));
    assert_eq!(
        harness.recorder.events_with_reason("AutoEvaluation").len(),
        1
    );
}
