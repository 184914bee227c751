//! AWS Bedrock provider (Converse API, SigV4 via the AWS SDK).
//!
//! Compiled only with the `bedrock` cargo feature.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, Message as ConverseMessage, SystemContentBlock,
    Tool as ConverseTool, ToolConfiguration, ToolInputSchema, ToolResultBlock,
    ToolResultContentBlock, ToolSpecification, ToolUseBlock,
};
use aws_sdk_bedrockruntime::Client;

use keel_core::{
    BedrockConfig, FunctionCall, KeelError, KeelResult, Message, TokenUsage, ToolCallRequest,
};

use crate::{ChatCompletion, ChatModel, ChatRequest};

pub struct BedrockModel {
    client: Client,
    /// Model id or ARN passed to Converse
    model_id: String,
}

impl BedrockModel {
    pub async fn new(config: BedrockConfig, model_name: String) -> KeelResult<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;
        let model_id = config.model_arn.unwrap_or(model_name);

        Ok(Self {
            client: Client::new(&sdk_config),
            model_id,
        })
    }

    fn to_converse(messages: &[Message]) -> KeelResult<(Vec<SystemContentBlock>, Vec<ConverseMessage>)> {
        let mut system = Vec::new();
        let mut converse = Vec::new();

        for message in messages {
            match message {
                Message::System { content } => {
                    system.push(SystemContentBlock::Text(content.clone()));
                }
                Message::User { content } => {
                    converse.push(
                        ConverseMessage::builder()
                            .role(ConversationRole::User)
                            .content(ContentBlock::Text(content.clone()))
                            .build()
                            .map_err(|e| KeelError::provider(e.to_string()))?,
                    );
                }
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut builder =
                        ConverseMessage::builder().role(ConversationRole::Assistant);
                    if !content.is_empty() {
                        builder = builder.content(ContentBlock::Text(content.clone()));
                    }
                    for call in tool_calls.iter().flatten() {
                        let input = serde_json::from_str::<serde_json::Value>(
                            &call.function.arguments,
                        )
                        .unwrap_or_else(|_| serde_json::json!({}));
                        builder = builder.content(ContentBlock::ToolUse(
                            ToolUseBlock::builder()
                                .tool_use_id(call.id.clone())
                                .name(call.function.name.clone())
                                .input(json_to_document(&input))
                                .build()
                                .map_err(|e| KeelError::provider(e.to_string()))?,
                        ));
                    }
                    converse.push(builder.build().map_err(|e| KeelError::provider(e.to_string()))?);
                }
                Message::Tool {
                    content,
                    tool_call_id,
                } => {
                    converse.push(
                        ConverseMessage::builder()
                            .role(ConversationRole::User)
                            .content(ContentBlock::ToolResult(
                                ToolResultBlock::builder()
                                    .tool_use_id(tool_call_id.clone())
                                    .content(ToolResultContentBlock::Text(content.clone()))
                                    .build()
                                    .map_err(|e| KeelError::provider(e.to_string()))?,
                            ))
                            .build()
                            .map_err(|e| KeelError::provider(e.to_string()))?,
                    );
                }
            }
        }
        Ok((system, converse))
    }
}

#[async_trait]
impl ChatModel for BedrockModel {
    async fn chat_completion(&self, request: ChatRequest) -> KeelResult<ChatCompletion> {
        let (system, messages) = Self::to_converse(&request.messages)?;

        let mut converse = self
            .client
            .converse()
            .model_id(&self.model_id)
            .set_system(Some(system))
            .set_messages(Some(messages));

        if !request.tools.is_empty() {
            let mut config = ToolConfiguration::builder();
            for tool in &request.tools {
                config = config.tools(ConverseTool::ToolSpec(
                    ToolSpecification::builder()
                        .name(tool.name.clone())
                        .description(tool.description.clone())
                        .input_schema(ToolInputSchema::Json(json_to_document(&tool.parameters)))
                        .build()
                        .map_err(|e| KeelError::provider(e.to_string()))?,
                ));
            }
            converse = converse.tool_config(
                config
                    .build()
                    .map_err(|e| KeelError::provider(e.to_string()))?,
            );
        }

        let output = converse
            .send()
            .await
            .map_err(|e| KeelError::provider(format!("bedrock converse failed: {}", e)))?;

        let usage = output
            .usage()
            .map(|u| TokenUsage::new(u.input_tokens() as u64, u.output_tokens() as u64))
            .unwrap_or_default();

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(message) = output.output().and_then(|o| o.as_message().ok()) {
            for block in message.content() {
                match block {
                    ContentBlock::Text(text) => content.push_str(text),
                    ContentBlock::ToolUse(tool_use) => tool_calls.push(ToolCallRequest {
                        id: tool_use.tool_use_id().to_string(),
                        call_type: "function".to_string(),
                        function: FunctionCall {
                            name: tool_use.name().to_string(),
                            arguments: document_to_json(tool_use.input()).to_string(),
                        },
                    }),
                    _ => {}
                }
            }
        }

        Ok(ChatCompletion {
            message: Message::Assistant {
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            usage,
        })
    }

    /// Credentials and region are validated at construction; a live probe
    /// would bill a completion, so report configured as available.
    async fn probe(&self) -> KeelResult<()> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

fn json_to_document(value: &serde_json::Value) -> aws_sdk_bedrockruntime::primitives::Document {
    use aws_sdk_bedrockruntime::primitives::Document;
    match value {
        serde_json::Value::Null => Document::Null,
        serde_json::Value::Bool(b) => Document::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Document::Number(aws_smithy_types::Number::PosInt(v))
            } else if let Some(v) = n.as_i64() {
                Document::Number(aws_smithy_types::Number::NegInt(v))
            } else {
                Document::Number(aws_smithy_types::Number::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Document::String(s.clone()),
        serde_json::Value::Array(items) => {
            Document::Array(items.iter().map(json_to_document).collect())
        }
        serde_json::Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

fn document_to_json(document: &aws_sdk_bedrockruntime::primitives::Document) -> serde_json::Value {
    use aws_sdk_bedrockruntime::primitives::Document;
    match document {
        Document::Null => serde_json::Value::Null,
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Number(n) => match n {
            aws_smithy_types::Number::PosInt(v) => serde_json::json!(v),
            aws_smithy_types::Number::NegInt(v) => serde_json::json!(v),
            aws_smithy_types::Number::Float(v) => serde_json::json!(v),
        },
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Array(items) => {
            serde_json::Value::Array(items.iter().map(document_to_json).collect())
        }
        Document::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_json(v)))
                .collect(),
        ),
    }
}
