//! Post-filters applied to tool output.
//!
//! The supported jq subset covers what tool specs use in practice:
//! identity (`.`), field paths (`.a.b`), and numeric indexing (`.items[0]`).
//! String results are emitted unquoted; everything else is JSON.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use keel_core::{KeelError, KeelResult, ToolCall, ToolFilter, ToolResult};

use crate::registry::ToolExecutor;

/// Apply filters to a content string, in order.
pub fn apply_filters(content: &str, filters: &[ToolFilter]) -> KeelResult<String> {
    let mut current = content.to_string();
    for filter in filters {
        current = apply_jq(&current, &filter.expression)?;
    }
    Ok(current)
}

fn apply_jq(content: &str, expression: &str) -> KeelResult<String> {
    let value: Value = serde_json::from_str(content).map_err(|e| {
        KeelError::tool(format!("filter input is not JSON ({}): {}", e, content))
    })?;
    let result = select_path(&value, expression)?;
    Ok(match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn select_path<'a>(value: &'a Value, expression: &str) -> KeelResult<&'a Value> {
    let expression = expression.trim();
    if !expression.starts_with('.') {
        return Err(KeelError::validation(format!(
            "unsupported filter expression \"{}\"",
            expression
        )));
    }
    if expression == "." {
        return Ok(value);
    }

    let mut current = value;
    for segment in expression[1..].split('.') {
        if segment.is_empty() {
            continue;
        }
        let (field, indexes) = split_indexes(segment)?;
        if !field.is_empty() {
            current = current.get(field).ok_or_else(|| {
                KeelError::tool(format!("filter path .{} not found", field))
            })?;
        }
        for index in indexes {
            current = current.get(index).ok_or_else(|| {
                KeelError::tool(format!("filter index [{}] out of bounds", index))
            })?;
        }
    }
    Ok(current)
}

fn split_indexes(segment: &str) -> KeelResult<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Ok((segment, Vec::new()));
    };

    let field = &segment[..bracket];
    let mut indexes = Vec::new();
    let mut rest = &segment[bracket..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped
            .find(']')
            .ok_or_else(|| KeelError::validation(format!("unclosed index in \"{}\"", segment)))?;
        let index: usize = stripped[..close]
            .parse()
            .map_err(|_| KeelError::validation(format!("bad index in \"{}\"", segment)))?;
        indexes.push(index);
        rest = &stripped[close + 1..];
    }
    Ok((field, indexes))
}

/// Wraps an executor and filters its successful output
pub struct FilteredExecutor {
    inner: Arc<dyn ToolExecutor>,
    filters: Vec<ToolFilter>,
}

impl FilteredExecutor {
    pub fn new(inner: Arc<dyn ToolExecutor>, filters: Vec<ToolFilter>) -> Self {
        Self { inner, filters }
    }
}

#[async_trait]
impl ToolExecutor for FilteredExecutor {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        let result = self.inner.execute(call).await?;
        if result.error.is_some() || self.filters.is_empty() {
            return Ok(result);
        }
        match apply_filters(&result.content, &self.filters) {
            Ok(content) => Ok(ToolResult {
                content,
                ..result
            }),
            Err(e) => Ok(ToolResult::failed(call, e.to_string())),
        }
    }
}
