//! Structured events the loop reports to its caller.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::phase::LoopPhase;
use crate::plan::{PlanItem, Reflection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport or provider failure of a model call.
    ModelCall,
    /// Planning or reflection reply that did not parse.
    MalformedOutput,
    BudgetExhausted,
    /// Too many failed model calls in a row.
    FailureLimit,
    /// The goal ended without an answer.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LoopEvent {
    PhaseChange {
        from: Option<LoopPhase>,
        to: LoopPhase,
        iteration: u32,
        /// Description of the plan item in progress, if any.
        item: Option<String>,
    },
    ToolCall {
        call_id: String,
        tool: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool: String,
        result: Value,
    },
    BeliefUpdate {
        summary: String,
    },
    PlanUpdate {
        items: Vec<PlanItem>,
    },
    Reflection {
        item_id: Option<String>,
        reflection: Reflection,
        /// True when the model reply was unusable and the fixed fallback applied.
        fallback: bool,
    },
    ApprovalNeeded {
        sql: String,
        call_id: String,
        token: Uuid,
    },
    FinalAnswer {
        answer: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl LoopEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PhaseChange { .. } => "phase-change",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::BeliefUpdate { .. } => "belief-update",
            Self::PlanUpdate { .. } => "plan-update",
            Self::Reflection { .. } => "reflection",
            Self::ApprovalNeeded { .. } => "approval-needed",
            Self::FinalAnswer { .. } => "final-answer",
            Self::Error { .. } => "error",
        }
    }
}

/// Receiver of loop events. Injected into the loop; never a global.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LoopEvent);
}

/// Forwards events over an unbounded channel (UI side).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LoopEvent) {
        // receiver gone means the UI stopped listening
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LoopEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoopEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(LoopEvent::kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: LoopEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Logs events through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LoopEvent) {
        match &event {
            LoopEvent::Error { kind, message } => tracing::warn!(?kind, %message, "loop error"),
            LoopEvent::ToolCall { tool, call_id, .. } => tracing::info!(%tool, %call_id, "tool call"),
            LoopEvent::ApprovalNeeded { sql, .. } => tracing::info!(%sql, "approval needed"),
            LoopEvent::FinalAnswer { answer } => tracing::info!(chars = answer.len(), "final answer"),
            other => tracing::info!(event = other.kind(), "loop event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_and_survives_closed_receiver() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(LoopEvent::FinalAnswer { answer: "150".into() });
        assert_eq!(rx.recv().await.map(|e| e.kind()), Some("final-answer"));
        drop(rx);
        sink.emit(LoopEvent::BeliefUpdate { summary: "x".into() });
    }

    #[test]
    fn events_serialize_with_kebab_tag() {
        let e = LoopEvent::Error { kind: ErrorKind::BudgetExhausted, message: "budget".into() };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "error");
        assert_eq!(v["kind"], "budget_exhausted");
        let back: LoopEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.emit(LoopEvent::BeliefUpdate { summary: "a".into() });
        sink.emit(LoopEvent::FinalAnswer { answer: "b".into() });
        assert_eq!(sink.kinds(), vec!["belief-update", "final-answer"]);
    }
}
