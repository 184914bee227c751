//! HTTP tool executor.
//!
//! Substitutes `{param}` placeholders in the URL (URL-encoded) and body
//! (verbatim) from the call arguments, resolves header value sources, and
//! returns 4xx/5xx responses as result errors the model can react to.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use std::time::Duration;

use keel_core::{
    resolve_value, ClusterClient, HttpToolSpec, KeelError, KeelResult, ToolCall, ToolResult,
};

use crate::registry::ToolExecutor;

pub struct HttpExecutor {
    cluster: ClusterClient,
    namespace: String,
    spec: HttpToolSpec,
    http: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(
        cluster: ClusterClient,
        namespace: impl Into<String>,
        spec: HttpToolSpec,
    ) -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(spec.timeout_seconds))
            .build()
            .map_err(|e| KeelError::tool(format!("failed to build http tool client: {}", e)))?;
        Ok(Self {
            cluster,
            namespace: namespace.into(),
            spec,
            http,
        })
    }
}

#[async_trait]
impl ToolExecutor for HttpExecutor {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        let arguments = call.parsed_arguments();
        let url = substitute_placeholders(&self.spec.url, &arguments, true);
        let method = reqwest::Method::from_bytes(self.spec.method.to_uppercase().as_bytes())
            .map_err(|_| KeelError::validation(format!("invalid method {}", self.spec.method)))?;

        let mut request = self.http.request(method, &url);
        for header in &self.spec.headers {
            let value = resolve_value(&self.cluster, &self.namespace, &header.value).await?;
            request = request.header(&header.name, value);
        }
        if let Some(body) = &self.spec.body {
            request = request.body(substitute_placeholders(body, &arguments, false));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolResult::failed(call, format!("request failed: {}", e))),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_client_error() || status.is_server_error() {
            return Ok(ToolResult::failed(call, format!("{}: {}", status, text)));
        }
        Ok(ToolResult::ok(call, text))
    }
}

/// Replace `{key}` with the argument value; keys absent from the argument
/// map leave the placeholder unmodified. URL positions encode the value.
pub fn substitute_placeholders(
    template: &str,
    arguments: &serde_json::Map<String, Value>,
    url_encode: bool,
) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match arguments.get(key) {
                    Some(value) => {
                        let text = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        if url_encode {
                            output
                                .push_str(&utf8_percent_encode(&text, NON_ALPHANUMERIC).to_string());
                        } else {
                            output.push_str(&text);
                        }
                    }
                    None => {
                        output.push('{');
                        output.push_str(key);
                        output.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                output.push('{');
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::InMemoryCluster;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn arguments(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_substitution_url_encodes() {
        let args = arguments(json!({"city": "New York", "day": 3}));
        let url = substitute_placeholders("https://api/{city}/{day}", &args, true);
        assert_eq!(url, "https://api/New%20York/3");
    }

    #[test]
    fn test_missing_key_left_unmodified() {
        let args = arguments(json!({"a": "x"}));
        assert_eq!(
            substitute_placeholders("/{a}/{missing}", &args, true),
            "/x/{missing}"
        );
    }

    #[test]
    fn test_body_substitution_is_verbatim() {
        let args = arguments(json!({"q": "a b"}));
        assert_eq!(
            substitute_placeholders(r#"{"query": "{q}"}"#, &args, false),
            r#"{"query": "a b"}"#
        );
    }

    #[test]
    fn test_unclosed_brace_is_literal() {
        let args = arguments(json!({}));
        assert_eq!(substitute_placeholders("/x{y", &args, true), "/x{y");
    }

    fn call_with(arguments: &str) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            function_name: "weather".to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_http_executor_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather/Paris"))
            .and(header("X-Auth", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("sunny"))
            .mount(&server)
            .await;

        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let spec: HttpToolSpec = serde_yaml::from_str(&format!(
            "url: \"{}/weather/{{city}}\"\nheaders:\n  - name: X-Auth\n    value: {{value: token}}\n",
            server.uri()
        ))
        .unwrap();

        let executor = HttpExecutor::new(cluster, "default", spec).unwrap();
        let result = executor
            .execute(&call_with(r#"{"city":"Paris"}"#))
            .await
            .unwrap();
        assert_eq!(result.content, "sunny");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_http_error_is_result_error_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let spec: HttpToolSpec =
            serde_yaml::from_str(&format!("url: \"{}/x\"", server.uri())).unwrap();

        let executor = HttpExecutor::new(cluster, "default", spec).unwrap();
        let result = executor.execute(&call_with("{}")).await.unwrap();
        assert!(result.error.as_deref().unwrap().contains("503"));
    }
}
