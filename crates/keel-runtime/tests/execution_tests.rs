//! End-to-end runtime tests against a scripted OpenAI-compatible server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use keel_core::{ClusterClient, InMemoryCluster, Message, Query};
use keel_runtime::{ExecContext, QueryExecutor, TeamRuntime};

/// Returns scripted completions in order, then repeats the last one.
struct ScriptedCompletions {
    responses: Mutex<VecDeque<serde_json::Value>>,
    hits: Arc<Mutex<usize>>,
}

impl ScriptedCompletions {
    fn new(responses: Vec<serde_json::Value>, hits: Arc<Mutex<usize>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            hits,
        }
    }
}

impl Respond for ScriptedCompletions {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        *self.hits.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        let body = if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap_or_else(|| completion("empty"))
        };
        ResponseTemplate::new(200).set_body_json(body)
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

fn tool_call_completion(id: &str, name: &str, arguments: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": arguments}
            }]
        }}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

async fn cluster_with_model(server: &MockServer) -> ClusterClient {
    let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
    let model: keel_core::Model = serde_yaml::from_str(&format!(
        r#"
metadata: {{name: default}}
spec:
  type: openai
  model: {{value: gpt-4o}}
  config:
    openai:
      baseUrl: {{value: "{}"}}
      apiKey: {{value: test-key}}
"#,
        server.uri()
    ))
    .unwrap();
    cluster.create(&model).await.unwrap();
    cluster
}

async fn create_agent(cluster: &ClusterClient, yaml: &str) {
    let agent: keel_core::Agent = serde_yaml::from_str(yaml).unwrap();
    cluster.create(&agent).await.unwrap();
}

fn query(yaml: &str) -> Query {
    serde_yaml::from_str(yaml).unwrap()
}

#[tokio::test]
async fn test_direct_query_success() {
    let server = MockServer::start().await;
    let hits = Arc::new(Mutex::new(0));
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(ScriptedCompletions::new(vec![completion("ok")], hits))
        .mount(&server)
        .await;

    let cluster = cluster_with_model(&server).await;
    create_agent(
        &cluster,
        r#"
metadata: {name: echoer}
spec:
  prompt: "Echo: {{x}}"
  parameters:
    - {name: x, value: hi}
"#,
    )
    .await;

    let query = query(
        "metadata: {name: q1}\nspec:\n  input: go\n  targets:\n    - {type: agent, name: echoer}\n",
    );
    let ctx = ExecContext::new(cluster, "default").with_query(
        "q1",
        "q1",
        Default::default(),
    );

    let outcome = QueryExecutor::execute(&ctx, &query).await.unwrap();
    assert!(outcome.error.is_none());
    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(outcome.responses[0].content, "ok");
    assert_eq!(outcome.responses[0].target.name, "echoer");
    assert!(ctx.collector.total().total_tokens > 0);
}

#[tokio::test]
async fn test_tool_retry_loop() {
    let server = MockServer::start().await;
    let model_hits = Arc::new(Mutex::new(0));
    Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/chat/completions"))
        .respond_with(ScriptedCompletions::new(
            vec![
                tool_call_completion("c1", "weather", r#"{"city":"Paris"}"#),
                completion("sunny"),
            ],
            model_hits.clone(),
        ))
        .mount(&server)
        .await;
    Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/forecast/Paris"))
        .respond_with(ResponseTemplate::new(200).set_body_string("18C, clear"))
        .expect(1)
        .mount(&server)
        .await;

    let cluster = cluster_with_model(&server).await;
    let mut tool: keel_core::Tool = serde_yaml::from_str(
        r#"
metadata: {name: weather}
spec:
  type: http
  description: Get the weather for a city
  inputSchema:
    type: object
    properties:
      city: {type: string}
  http:
    url: placeholder
"#,
    )
    .unwrap();
    tool.spec.http.as_mut().unwrap().url = format!("{}/forecast/{{city}}", server.uri());
    cluster.create(&tool).await.unwrap();

    create_agent(
        &cluster,
        r#"
metadata: {name: forecaster}
spec:
  prompt: "You report weather."
  tools:
    - {name: weather}
"#,
    )
    .await;

    let query = query(
        "metadata: {name: q2}\nspec:\n  input: \"weather in Paris?\"\n  targets:\n    - {type: agent, name: forecaster}\n",
    );
    let ctx = ExecContext::new(cluster, "default").with_query("q2", "q2", Default::default());

    let outcome = QueryExecutor::execute(&ctx, &query).await.unwrap();
    assert!(outcome.error.is_none());
    assert_eq!(outcome.responses[0].content, "sunny");
    assert_eq!(*model_hits.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_team_sequential_termination() {
    let server = MockServer::start().await;
    let model_hits = Arc::new(Mutex::new(0));
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(ScriptedCompletions::new(
            vec![
                completion("a1 draft"),
                tool_call_completion("c1", "terminate", r#"{"response":"stop"}"#),
            ],
            model_hits.clone(),
        ))
        .mount(&server)
        .await;

    let cluster = cluster_with_model(&server).await;
    for name in ["a1", "a3"] {
        create_agent(
            &cluster,
            &format!("metadata: {{name: {}}}\nspec: {{prompt: work}}\n", name),
        )
        .await;
    }
    create_agent(
        &cluster,
        r#"
metadata: {name: a2}
spec:
  prompt: decide
  tools:
    - {type: builtin, name: terminate}
"#,
    )
    .await;

    let team: keel_core::Team = serde_yaml::from_str(
        r#"
metadata: {name: writers}
spec:
  strategy: sequential
  members:
    - {name: a1}
    - {name: a2}
    - {name: a3}
"#,
    )
    .unwrap();
    cluster.create(&team).await.unwrap();

    let ctx = ExecContext::new(cluster, "default");
    let runtime = TeamRuntime::load(&ctx, "writers").await.unwrap();
    let outcome = runtime.execute(Message::user("write"), &[]).await.unwrap();

    assert!(outcome.terminated);
    // a1's draft plus a2's terminate exchange; a3 never ran.
    assert_eq!(*model_hits.lock().unwrap(), 2);
    let contents: Vec<&str> = outcome.messages.iter().map(|m| m.content()).collect();
    assert!(contents.contains(&"a1 draft"));
    assert!(contents.contains(&"stop"));
}

#[tokio::test]
async fn test_failing_target_does_not_short_circuit_others() {
    let server = MockServer::start().await;
    let hits = Arc::new(Mutex::new(0));
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(ScriptedCompletions::new(vec![completion("fine")], hits))
        .mount(&server)
        .await;

    let cluster = cluster_with_model(&server).await;
    create_agent(&cluster, "metadata: {name: good}\nspec: {prompt: hi}\n").await;
    create_agent(
        &cluster,
        "metadata: {name: broken}\nspec:\n  prompt: hi\n  modelRef: {name: ghost-model}\n",
    )
    .await;

    let query = query(
        r#"
metadata: {name: q3}
spec:
  input: go
  targets:
    - {type: agent, name: broken}
    - {type: agent, name: good}
"#,
    );
    let ctx = ExecContext::new(cluster, "default").with_query("q3", "q3", Default::default());

    let outcome = QueryExecutor::execute(&ctx, &query).await.unwrap();
    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(outcome.responses[0].target.name, "good");
    assert!(outcome.error.as_deref().unwrap().contains("broken"));
}

#[tokio::test]
async fn test_model_target_direct_completion() {
    let server = MockServer::start().await;
    let hits = Arc::new(Mutex::new(0));
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(ScriptedCompletions::new(vec![completion("direct")], hits))
        .mount(&server)
        .await;

    let cluster = cluster_with_model(&server).await;
    let query = query(
        "metadata: {name: q4}\nspec:\n  input: hello\n  targets:\n    - {type: model, name: default}\n",
    );
    let ctx = ExecContext::new(cluster, "default").with_query("q4", "q4", Default::default());

    let outcome = QueryExecutor::execute(&ctx, &query).await.unwrap();
    assert_eq!(outcome.responses[0].content, "direct");
}
