//! Anthropic Messages API backend with native tool use.

use serde::{Deserialize, Serialize};

use crate::http::{ProviderKind, check_error, role_str};
use crate::provider::{
    ChatMessage, CompletionFuture, CompletionRequest, CompletionResponse, ContentBlock, LlmError,
    LlmProvider, Role, StopReason, ToolDefinition,
};

const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicToolDef>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicMessageContent,
}

/// Message content: either a plain string or an array of content blocks.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicMessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Serialize)]
struct AnthropicToolDef {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

impl From<&ToolDefinition> for AnthropicToolDef {
    fn from(td: &ToolDefinition) -> Self {
        Self {
            name: td.name.clone(),
            description: td.description.clone(),
            input_schema: td.input_schema.clone(),
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicProvider {
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| ProviderKind::Anthropic.default_base_url().to_owned());
        Self {
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    async fn complete_inner(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tracing::debug!(model = %self.model, messages = request.messages.len(), tools = request.tools.len(), "anthropic request");
        let (system, messages) = split_system(&request.messages);
        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
            tools: request.tools.iter().map(AnthropicToolDef::from).collect(),
        };

        let resp = self.client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, "anthropic request failed");
            return Err(check_error(status, text));
        }

        let api: AnthropicResponse = resp.json().await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(from_anthropic_response(api))
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        ProviderKind::Anthropic.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        Box::pin(self.complete_inner(request))
    }
}

/// System messages go to the top-level `system` field (joined when several).
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system: Vec<&str> = Vec::new();
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == Role::System {
            system.push(&m.content);
            continue;
        }
        let content = if m.content_blocks.is_empty() {
            AnthropicMessageContent::Text(m.content.clone())
        } else {
            AnthropicMessageContent::Blocks(m.content_blocks.clone())
        };
        out.push(AnthropicMessage { role: role_str(&m.role), content });
    }
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

fn from_anthropic_response(api: AnthropicResponse) -> CompletionResponse {
    let content_blocks: Vec<ContentBlock> = api.content.into_iter().filter_map(|b| match b {
        AnthropicResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
        AnthropicResponseBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
        AnthropicResponseBlock::Other => None,
    }).collect();

    let content: String = content_blocks.iter().filter_map(|b| match b {
        ContentBlock::Text { text } => Some(text.as_str()),
        _ => None,
    }).collect::<Vec<_>>().join("");

    let stop_reason = match api.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    let (input_tokens, output_tokens) = api.usage
        .map(|u| (u.input_tokens, u.output_tokens)).unwrap_or((0, 0));

    CompletionResponse { content, content_blocks, stop_reason, input_tokens, output_tokens }
}
