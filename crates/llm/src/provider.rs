use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Plain text content: all Text blocks joined.
    pub content: String,
    /// Structured content blocks (native tool use protocol).
    /// Empty means the message is plain text only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_blocks: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), content_blocks: vec![] }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), content_blocks: vec![] }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), content_blocks: vec![] }
    }

    /// Build a message from structured content blocks.
    pub fn from_content_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        let text = join_text(&blocks);
        Self { role, content: text, content_blocks: blocks }
    }

    /// Build a User message carrying tool results.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self { role: Role::User, content: String::new(), content_blocks: results }
    }

    /// True if this message carries at least one tool result block.
    pub fn has_tool_results(&self) -> bool {
        self.content_blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }

    /// Append a text block, keeping `content` and `content_blocks` consistent.
    pub fn push_text(&mut self, text: &str) {
        if self.content_blocks.is_empty() && !self.content.is_empty() {
            self.content_blocks.push(ContentBlock::Text { text: self.content.clone() });
        }
        self.content_blocks.push(ContentBlock::Text { text: text.to_owned() });
        if !self.content.is_empty() {
            self.content.push_str("\n\n");
        }
        self.content.push_str(text);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

// ── Tool use types ──

/// Tool definition sent in requests (name + description + JSON Schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

/// A tool invocation requested by the model, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Tool definitions for native tool use (empty = no tools).
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    /// Text of the final message, which carries the instruction for this call.
    pub fn last_text(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or_default()
    }
}

/// LLM completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Convenience: concatenation of all Text blocks.
    pub content: String,
    /// Structured content blocks from the model.
    pub content_blocks: Vec<ContentBlock>,
    /// Why the model stopped.
    pub stop_reason: StopReason,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl CompletionResponse {
    /// Plain-text response.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            content_blocks: vec![ContentBlock::Text { text: content.clone() }],
            content,
            stop_reason: StopReason::EndTurn,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Response requesting tool invocations (optionally preceded by text blocks).
    pub fn with_blocks(blocks: Vec<ContentBlock>) -> Self {
        let stop_reason = if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };
        Self {
            content: join_text(&blocks),
            content_blocks: blocks,
            stop_reason,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Tool invocations requested by the model, in the order emitted.
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        self.content_blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Error type for LLM operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>>;

/// Trait for LLM providers (OpenAI, Claude, Gemini, etc.)
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier the provider was built for.
    fn model(&self) -> &str {
        ""
    }

    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_>;
}

/// Provider returning one fixed response, for tests.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub response: String,
    pub response_blocks: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        let text = response.into();
        Self {
            response: text.clone(),
            response_blocks: vec![ContentBlock::Text { text }],
            stop_reason: StopReason::EndTurn,
        }
    }

    /// Create a mock that returns specific content blocks and stop reason.
    pub fn with_blocks(blocks: Vec<ContentBlock>, stop_reason: StopReason) -> Self {
        Self { response: join_text(&blocks), response_blocks: blocks, stop_reason }
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, _request: CompletionRequest) -> CompletionFuture<'_> {
        let content = self.response.clone();
        let blocks = self.response_blocks.clone();
        let stop = self.stop_reason;
        Box::pin(async move {
            Ok(CompletionResponse {
                content,
                content_blocks: blocks,
                stop_reason: stop,
                input_tokens: 10,
                output_tokens: 20,
            })
        })
    }
}

/// Provider that replays a fixed sequence of outcomes, one per call.
/// Every request is recorded so tests can inspect the prompts that were sent.
/// Once the script runs out, calls fail with `Unavailable`.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of all requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".into())));
        Box::pin(async move { next })
    }
}
