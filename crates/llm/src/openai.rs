//! OpenAI-compatible chat completions backend (OpenAI, Gemini, DeepSeek, ...).

use serde::{Deserialize, Serialize};

use crate::http::{ProviderKind, check_error, role_str};
use crate::provider::{
    ChatMessage, CompletionFuture, CompletionRequest, CompletionResponse, ContentBlock, LlmError,
    LlmProvider, Role, StopReason, ToolDefinition,
};

// ── OpenAI-compatible request/response types ──

#[derive(Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Debug, Serialize)]
struct OaiMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OaiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn text(role: &'static str, content: String) -> Self {
        Self { role, content: Some(content), tool_calls: vec![], tool_call_id: None }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: OaiFunctionCall,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct OaiFunctionCall {
    name: String,
    /// JSON-encoded arguments, as the API transports them.
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OaiFunctionDef,
}

#[derive(Serialize)]
struct OaiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolDefinition> for OaiTool {
    fn from(td: &ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: OaiFunctionDef {
                name: td.name.clone(),
                description: td.description.clone(),
                parameters: td.input_schema.clone(),
            },
        }
    }
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
    usage: Option<OaiUsage>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

#[derive(Deserialize)]
struct OaiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Provider speaking the `/chat/completions` protocol with function calling.
pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(kind: ProviderKind, model: String, api_key: String, base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        Self {
            kind,
            model,
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete_inner(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tracing::debug!(provider = self.kind.as_str(), model = %self.model, messages = request.messages.len(), tools = request.tools.len(), "chat completion request");
        let body = OaiRequest {
            model: self.model.clone(),
            messages: to_oai_messages(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request.tools.iter().map(OaiTool::from).collect(),
        };

        let resp = self.client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(provider = self.kind.as_str(), %status, "chat completion failed");
            return Err(check_error(status, text));
        }

        let api: OaiResponse = resp.json().await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        from_oai_response(api)
    }
}

impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        Box::pin(self.complete_inner(request))
    }
}

/// Flatten our block-structured conversation into the OpenAI message list.
/// Tool results become one `tool` message each; text riding along in the same
/// user turn follows as a separate `user` message.
fn to_oai_messages(messages: &[ChatMessage]) -> Vec<OaiMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        if m.content_blocks.is_empty() {
            out.push(OaiMessage::text(role_str(&m.role), m.content.clone()));
            continue;
        }
        match m.role {
            Role::Assistant => {
                let tool_calls: Vec<OaiToolCall> = m.content_blocks.iter().filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(OaiToolCall {
                        id: id.clone(),
                        kind: function_kind(),
                        function: OaiFunctionCall { name: name.clone(), arguments: input.to_string() },
                    }),
                    _ => None,
                }).collect();
                let content = (!m.content.is_empty()).then(|| m.content.clone());
                out.push(OaiMessage { role: "assistant", content, tool_calls, tool_call_id: None });
            }
            Role::User | Role::System => {
                let mut texts = Vec::new();
                for b in &m.content_blocks {
                    match b {
                        ContentBlock::ToolResult { tool_use_id, content, .. } => out.push(OaiMessage {
                            role: "tool",
                            content: Some(content.clone()),
                            tool_calls: vec![],
                            tool_call_id: Some(tool_use_id.clone()),
                        }),
                        ContentBlock::Text { text } => texts.push(text.as_str()),
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
                if !texts.is_empty() {
                    out.push(OaiMessage::text(role_str(&m.role), texts.join("\n\n")));
                }
            }
        }
    }
    out
}

fn from_oai_response(api: OaiResponse) -> Result<CompletionResponse, LlmError> {
    let choice = api.choices.into_iter().next()
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices".into()))?;
    let (input_tokens, output_tokens) = api.usage
        .map(|u| (u.prompt_tokens, u.completion_tokens)).unwrap_or((0, 0));

    let content = choice.message.content.unwrap_or_default();
    let mut content_blocks = Vec::new();
    if !content.is_empty() {
        content_blocks.push(ContentBlock::Text { text: content.clone() });
    }
    for call in choice.message.tool_calls {
        let input = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&call.function.arguments)
                .map_err(|e| LlmError::InvalidResponse(format!("tool arguments for {}: {e}", call.function.name)))?
        };
        content_blocks.push(ContentBlock::ToolUse { id: call.id, name: call.function.name, input });
    }

    let has_tools = content_blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. }));
    let stop_reason = match choice.finish_reason.as_deref() {
        _ if has_tools => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    Ok(CompletionResponse { content, content_blocks, stop_reason, input_tokens, output_tokens })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_endpoint() {
        let p = OpenAiCompatProvider::new(ProviderKind::OpenAi, "gpt-4o".into(), "sk-test".into(), None);
        assert_eq!(p.endpoint(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn google_uses_openai_compatible_endpoint() {
        let p = OpenAiCompatProvider::new(ProviderKind::Google, "gemini-1.5-pro".into(), "k".into(), None);
        assert_eq!(
            p.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
    }

    #[test]
    fn custom_base_url_override() {
        let p = OpenAiCompatProvider::new(
            ProviderKind::OpenAi,
            "gpt-4o".into(),
            "sk-test".into(),
            Some("https://my-proxy.com/v1/".into()),
        );
        assert_eq!(p.endpoint(), "https://my-proxy.com/v1/chat/completions");
    }

    #[test]
    fn tool_round_trip_messages_are_flattened() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("how many users"),
            ChatMessage::from_content_blocks(Role::Assistant, vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "list_schemas".into(),
                input: serde_json::json!({}),
            }]),
            {
                let mut m = ChatMessage::tool_results(vec![ContentBlock::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: r#"{"schemas":["public"]}"#.into(),
                    is_error: false,
                }]);
                m.push_text("continue");
                m
            },
        ];

        let out = to_oai_messages(&messages);
        let roles: Vec<_> = out.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool", "user"]);
        assert!(out[2].content.is_none());
        assert_eq!(out[2].tool_calls[0].function.arguments, "{}");
        assert_eq!(out[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(out[4].content.as_deref(), Some("continue"));
    }

    #[test]
    fn response_with_tool_calls_parses_arguments() {
        let api: OaiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "execute_query", "arguments": "{\"sql\":\"SELECT 1\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .unwrap();

        let resp = from_oai_response(api).unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        let uses = resp.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].input["sql"], "SELECT 1");
        assert_eq!(resp.input_tokens, 12);
    }

    #[test]
    fn response_without_choices_is_invalid() {
        let api: OaiResponse = serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        assert!(matches!(from_oai_response(api), Err(LlmError::InvalidResponse(_))));
    }
}
