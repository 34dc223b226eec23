use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use scout_llm::provider::{ChatMessage, ContentBlock, ToolUse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::approval::{ApprovalDecision, PendingApproval, ResumeError};
use super::phase::LoopPhase;
use crate::belief::BeliefStore;
use crate::plan::PlanQueue;

/// A tool invocation requested by the model and not yet processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCall {
    pub call_id: String,
    pub tool: String,
    pub arguments: Value,
}

impl From<ToolUse> for PendingCall {
    fn from(t: ToolUse) -> Self {
        Self { call_id: t.id, tool: t.name, arguments: t.input }
    }
}

/// Everything the loop knows about one goal. Owned by the loop while it runs,
/// handed to the caller at suspension, and accepted back unchanged on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub goal: String,
    pub goal_satisfied: bool,
    pub beliefs: BeliefStore,
    pub plan: PlanQueue,
    pub conversation: Vec<ChatMessage>,
    pub iteration: u32,
    pub phase: LoopPhase,
    pub current_item: Option<String>,
    pub pending_calls: VecDeque<PendingCall>,
    pub pending_approval: Option<PendingApproval>,
    pub consecutive_failures: u32,
    pub started_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(goal: impl Into<String>, beliefs: BeliefStore, system_prompt: &str) -> Self {
        let goal = goal.into();
        Self {
            conversation: vec![ChatMessage::system(system_prompt), ChatMessage::user(goal.clone())],
            goal,
            goal_satisfied: false,
            beliefs,
            plan: PlanQueue::new(),
            iteration: 0,
            phase: LoopPhase::Assessing,
            current_item: None,
            pending_calls: VecDeque::new(),
            pending_approval: None,
            consecutive_failures: 0,
            started_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Validate a decision against the pending approval without consuming
    /// the session.
    pub fn check_decision(&self, decision: &ApprovalDecision) -> Result<(), ResumeError> {
        self.pending_approval
            .as_ref()
            .ok_or(ResumeError::NothingPending)?
            .check(decision)
    }

    /// Append a tool result, joining the trailing tool-result message so all
    /// results for one assistant turn travel together.
    pub(crate) fn record_tool_result(&mut self, call_id: &str, content: String, is_error: bool) {
        let block = ContentBlock::ToolResult { tool_use_id: call_id.to_owned(), content, is_error };
        match self.conversation.last_mut() {
            Some(last) if last.has_tool_results() => last.content_blocks.push(block),
            _ => self.conversation.push(ChatMessage::tool_results(vec![block])),
        }
    }
}
