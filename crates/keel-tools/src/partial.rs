//! Partial-parameter wrapper.
//!
//! A tool may declare a `partial` block of templated parameters evaluated
//! against the enclosing query's parameters. The rendered values are merged
//! under the model-supplied arguments before delegation; the model wins on
//! conflict.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use keel_core::{KeelError, KeelResult, TemplateParameter, ToolCall, ToolResult};

use crate::registry::ToolExecutor;

pub struct PartialExecutor {
    inner: Arc<dyn ToolExecutor>,
    partial: Vec<TemplateParameter>,
    query_parameters: HashMap<String, String>,
}

impl PartialExecutor {
    pub fn new(
        inner: Arc<dyn ToolExecutor>,
        partial: Vec<TemplateParameter>,
        query_parameters: HashMap<String, String>,
    ) -> Self {
        Self {
            inner,
            partial,
            query_parameters,
        }
    }

    fn rendered_partials(&self) -> KeelResult<Map<String, Value>> {
        let mut env = minijinja::Environment::new();
        let mut rendered = Map::new();
        for parameter in &self.partial {
            env.add_template(&parameter.name, &parameter.value)
                .map_err(|e| {
                    KeelError::validation(format!(
                        "bad partial template {}: {}",
                        parameter.name, e
                    ))
                })?;
            let value = env
                .get_template(&parameter.name)
                .and_then(|t| t.render(&self.query_parameters))
                .map_err(|e| {
                    KeelError::tool(format!(
                        "failed to render partial {}: {}",
                        parameter.name, e
                    ))
                })?;
            rendered.insert(parameter.name.clone(), Value::String(value));
        }
        Ok(rendered)
    }
}

#[async_trait]
impl ToolExecutor for PartialExecutor {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        if self.partial.is_empty() {
            return self.inner.execute(call).await;
        }

        let mut merged = self.rendered_partials()?;
        for (key, value) in call.parsed_arguments() {
            merged.insert(key, value);
        }

        let call = ToolCall {
            id: call.id.clone(),
            function_name: call.function_name.clone(),
            arguments: Value::Object(merged).to_string(),
        };
        self.inner.execute(&call).await
    }
}
