//! The belief-driven execution loop.
//!
//! One goal runs as a strictly sequential pipeline over a single
//! `SessionState`. The only suspension point is the approval gate in front of
//! `execute_query`; everything else runs until the goal is answered, the
//! iteration budget runs out, or the model keeps failing.

use std::sync::Arc;

use scout_llm::provider::{ChatMessage, CompletionRequest, LlmError, LlmProvider, Role, ToolDefinition};
use serde_json::{Value, json};

use super::approval::{ApprovalDecision, PendingApproval, ResumeError};
use super::events::{ErrorKind, EventSink, LoopEvent};
use super::phase::LoopPhase;
use super::prompts::{self, preview};
use super::session::{PendingCall, SessionState};
use crate::belief::{BeliefStore, extract_table_name_heuristic};
use crate::config::ScoutCfg;
use crate::gateway::{ToolGateway, ToolName, error_payload, is_error_payload, string_arg, tool_definitions};
use crate::plan::{
    ItemVerdict, PlanStatus, ProposedItem, Reflection, URGENT_PRIORITY, parse_plan, parse_reflection,
};

/// `error_type` of the synthetic result a rejected query produces.
pub const REJECTED_BY_USER: &str = "rejected_by_user";

const RESULT_PREVIEW_CHARS: usize = 200;

/// How a goal run ended, or where it paused.
#[derive(Debug)]
pub enum LoopOutcome {
    Finished { answer: String, session: SessionState },
    /// Waiting at the approval gate. Pass the session back to `resume`.
    Suspended { approval: PendingApproval, session: SessionState },
    Aborted { reason: String, session: SessionState },
}

impl LoopOutcome {
    pub fn session(&self) -> &SessionState {
        match self {
            Self::Finished { session, .. } | Self::Suspended { session, .. } | Self::Aborted { session, .. } => session,
        }
    }

    pub fn into_session(self) -> SessionState {
        match self {
            Self::Finished { session, .. } | Self::Suspended { session, .. } | Self::Aborted { session, .. } => session,
        }
    }
}

/// What a tool result looked like, for reflection and its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    Data,
    Empty,
    Error,
    Rejected,
}

impl Observation {
    fn classify(tool: ToolName, result: &Value) -> Self {
        if result.get("error_type").and_then(Value::as_str) == Some(REJECTED_BY_USER) {
            return Self::Rejected;
        }
        if is_error_payload(result) {
            return Self::Error;
        }
        let empty = |key: &str| result.get(key).and_then(Value::as_array).is_some_and(|a| a.is_empty());
        let is_empty = match tool {
            ToolName::ExecuteQuery => {
                result.get("row_count").and_then(Value::as_u64) == Some(0) || empty("data")
            }
            ToolName::ListSchemas => empty("schemas"),
            ToolName::ListTables => empty("tables"),
            _ => false,
        };
        if is_empty { Self::Empty } else { Self::Data }
    }
}

#[derive(Clone)]
pub struct ExecutionLoop {
    llm: Arc<dyn LlmProvider>,
    gateway: Arc<dyn ToolGateway>,
    sink: Arc<dyn EventSink>,
    cfg: Arc<ScoutCfg>,
}

impl ExecutionLoop {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        gateway: Arc<dyn ToolGateway>,
        sink: Arc<dyn EventSink>,
        cfg: ScoutCfg,
    ) -> Self {
        Self { llm, gateway, sink, cfg: Arc::new(cfg) }
    }

    pub fn cfg(&self) -> &ScoutCfg {
        &self.cfg
    }

    /// Run a new goal from `Assessing`. `prior` seeds the belief store when
    /// the caller carries beliefs across goals.
    pub async fn start(&self, goal: &str, prior: Option<BeliefStore>) -> LoopOutcome {
        let mut s = SessionState::new(goal, prior.unwrap_or_default(), prompts::SYSTEM_PROMPT);
        tracing::info!(
            goal,
            model = self.llm.model(),
            db = %self.gateway.describe_target(),
            "goal started"
        );
        self.emit(LoopEvent::PhaseChange { from: None, to: LoopPhase::Assessing, iteration: 0, item: None });
        self.assess(&mut s).await;
        self.plan(&mut s).await;
        self.drive(s).await
    }

    /// Continue a session suspended at the approval gate.
    ///
    /// The decision is validated before anything changes; call
    /// `SessionState::check_decision` first to keep the session on error.
    pub async fn resume(&self, mut s: SessionState, decision: ApprovalDecision) -> Result<LoopOutcome, ResumeError> {
        s.check_decision(&decision)?;
        let pending = s.pending_approval.take().ok_or(ResumeError::NothingPending)?;
        if s.current_item.is_none() {
            s.current_item = pending
                .item_id
                .clone()
                .filter(|id| s.plan.get(id).is_some_and(|i| !i.status.is_terminal()));
        }

        let call = PendingCall {
            call_id: pending.call_id.clone(),
            tool: ToolName::ExecuteQuery.as_str().to_owned(),
            arguments: json!({ "sql": &pending.sql }),
        };

        let result = if decision.approved {
            tracing::info!(call_id = %call.call_id, "query approved");
            self.emit(LoopEvent::ToolCall {
                call_id: call.call_id.clone(),
                tool: call.tool.clone(),
                arguments: call.arguments.clone(),
            });
            self.gateway.invoke(ToolName::ExecuteQuery, &call.arguments).await
        } else {
            tracing::info!(call_id = %call.call_id, "query rejected");
            if s.beliefs.add_disproven(format!("Query was rejected by the user: {}", pending.sql)) {
                self.emit(LoopEvent::BeliefUpdate { summary: s.beliefs.describe() });
            }
            s.plan.add(prompts::ALTERNATIVE_APPROACH, URGENT_PRIORITY);
            json!({
                "success": false,
                "error": prompts::REJECTION_MESSAGE,
                "error_type": REJECTED_BY_USER,
            })
        };

        self.observe(&mut s, ToolName::ExecuteQuery, &call, result).await;
        Ok(self.drive(s).await)
    }

    fn emit(&self, event: LoopEvent) {
        tracing::debug!(kind = event.kind(), "loop event");
        self.sink.emit(event);
    }

    fn enter(&self, s: &mut SessionState, to: LoopPhase) {
        if s.phase == to {
            return;
        }
        if !s.phase.can_transition_to(to) {
            tracing::warn!(from = %s.phase, %to, "unexpected phase transition");
        }
        let from = s.phase;
        s.phase = to;
        let item = s
            .current_item
            .as_deref()
            .and_then(|id| s.plan.get(id))
            .map(|i| i.description.clone());
        self.emit(LoopEvent::PhaseChange { from: Some(from), to, iteration: s.iteration, item });
    }

    fn emit_plan(&self, s: &SessionState) {
        self.emit(LoopEvent::PlanUpdate { items: s.plan.items().to_vec() });
    }

    fn request(&self, messages: Vec<ChatMessage>, max_tokens: u32, tools: Vec<ToolDefinition>) -> CompletionRequest {
        CompletionRequest { messages, max_tokens, temperature: self.cfg.temperature, tools }
    }

    /// System prompt plus one instruction, without the running conversation.
    fn standalone(&self, prompt: String, max_tokens: u32) -> CompletionRequest {
        self.request(
            vec![ChatMessage::system(prompts::SYSTEM_PROMPT), ChatMessage::user(prompt)],
            max_tokens,
            Vec::new(),
        )
    }

    fn model_failure(&self, s: &mut SessionState, step: &str, err: &LlmError) {
        s.consecutive_failures += 1;
        tracing::warn!(step, error = %err, failures = s.consecutive_failures, "model call failed");
        self.emit(LoopEvent::Error { kind: ErrorKind::ModelCall, message: format!("{step}: {err}") });
    }

    fn malformed(&self, step: &str, detail: impl std::fmt::Display) {
        tracing::warn!(step, %detail, "malformed model output");
        self.emit(LoopEvent::Error {
            kind: ErrorKind::MalformedOutput,
            message: format!("{step}: {detail}"),
        });
    }

    fn absorb(&self, s: &mut SessionState, tool: ToolName, arguments: &Value, result: &Value) {
        if s.beliefs.absorb(tool, arguments, result) {
            self.emit(LoopEvent::BeliefUpdate { summary: s.beliefs.describe() });
        } else if is_error_payload(result) {
            tracing::debug!(%tool, "error result not absorbed");
        }
    }

    // ── Assessing ──

    async fn assess(&self, s: &mut SessionState) {
        let mut n = 0;
        if s.beliefs.known_schemas.is_empty() {
            n += 1;
            self.direct_call(s, ToolName::ListSchemas, json!({}), format!("assess-{n}")).await;
        }
        for schema in s.beliefs.unlisted_schemas() {
            n += 1;
            let args = json!({ "schema_name": schema });
            self.direct_call(s, ToolName::ListTables, args, format!("assess-{n}")).await;
        }
        tracing::debug!(calls = n, schemas = s.beliefs.known_schemas.len(), "assessment done");
    }

    /// Tool call made by the loop itself; not part of the model conversation.
    async fn direct_call(&self, s: &mut SessionState, tool: ToolName, arguments: Value, call_id: String) {
        self.emit(LoopEvent::ToolCall {
            call_id: call_id.clone(),
            tool: tool.as_str().to_owned(),
            arguments: arguments.clone(),
        });
        let result = self.gateway.invoke(tool, &arguments).await;
        self.emit(LoopEvent::ToolResult { call_id, tool: tool.as_str().to_owned(), result: result.clone() });
        self.absorb(s, tool, &arguments, &result);
    }

    // ── Planning ──

    async fn plan(&self, s: &mut SessionState) {
        self.enter(s, LoopPhase::Planning);
        let prompt = prompts::planning(
            &s.goal,
            &s.beliefs.describe(),
            self.cfg.plan_min_items,
            self.cfg.plan_max_items,
        );
        let proposed = match self.llm.complete(self.standalone(prompt, self.cfg.json_max_tokens)).await {
            Ok(resp) => {
                s.consecutive_failures = 0;
                match parse_plan(&resp.content, self.cfg.plan_max_items) {
                    Ok(plan) => Some(plan.items),
                    Err(e) => {
                        self.malformed("planning", e);
                        None
                    }
                }
            }
            Err(e) => {
                self.model_failure(s, "planning", &e);
                None
            }
        };

        match proposed {
            Some(items) => {
                if items.len() < self.cfg.plan_min_items {
                    tracing::debug!(items = items.len(), "short plan accepted");
                }
                for item in items {
                    s.plan.add(item.description, item.priority.max(1));
                }
            }
            None => {
                for (description, priority) in prompts::FALLBACK_PLAN.iter().zip(1u32..) {
                    s.plan.add(*description, priority);
                }
            }
        }
        self.emit_plan(s);
    }

    // ── Main loop ──

    async fn drive(&self, mut s: SessionState) -> LoopOutcome {
        loop {
            while let Some(call) = s.pending_calls.pop_front() {
                if let Some(approval) = self.process_call(&mut s, call).await {
                    return LoopOutcome::Suspended { approval, session: s };
                }
            }

            if s.goal_satisfied {
                return self.synthesize(s).await;
            }
            if s.iteration >= self.cfg.max_iterations {
                let message = format!("iteration budget of {} exhausted", self.cfg.max_iterations);
                tracing::warn!(iterations = s.iteration, "{message}");
                self.emit(LoopEvent::Error { kind: ErrorKind::BudgetExhausted, message });
                return self.synthesize(s).await;
            }
            if s.consecutive_failures >= self.cfg.max_consecutive_model_failures {
                let message = format!("{} consecutive model failures", s.consecutive_failures);
                tracing::warn!("{message}");
                self.emit(LoopEvent::Error { kind: ErrorKind::FailureLimit, message });
                return self.synthesize(s).await;
            }

            s.iteration += 1;
            self.enter(&mut s, LoopPhase::Selecting);
            let item_id = self.select(&mut s);
            self.act(&mut s, &item_id).await;
        }
    }

    /// Current item unless something more urgent is pending; otherwise the
    /// next pending item, or a fresh verification item when the queue is dry.
    fn select(&self, s: &mut SessionState) -> String {
        let next = s.plan.next().map(|i| (i.id.clone(), i.priority));

        if let Some(current) = s.current_item.clone() {
            let live = s
                .plan
                .get(&current)
                .filter(|i| i.status == PlanStatus::InProgress)
                .map(|i| i.priority);
            if let Some(priority) = live {
                match &next {
                    Some((next_id, p)) if *p < priority => {
                        tracing::debug!(%current, preempted_by = %next_id, "plan item preempted");
                        s.plan.requeue(&current);
                    }
                    _ => return current,
                }
            }
        }

        let id = match next {
            Some((id, _)) => id,
            None => {
                tracing::debug!("plan exhausted before goal satisfied");
                s.plan.add(prompts::FALLBACK_ITEM, 1)
            }
        };
        s.plan.begin(&id);
        s.current_item = Some(id.clone());
        self.emit_plan(s);
        id
    }

    async fn act(&self, s: &mut SessionState, item_id: &str) {
        self.enter(s, LoopPhase::Acting);
        let description = s.plan.get(item_id).map(|i| i.description.clone()).unwrap_or_default();
        let instruction = prompts::acting(&s.goal, item_id, &description, &s.beliefs.describe(), &s.plan);

        // The instruction rides on the request only; the stored conversation
        // keeps just what the model said and what the tools returned.
        let mut messages = s.conversation.clone();
        match messages.last_mut() {
            Some(last) if last.role == Role::User => last.push_text(&instruction),
            _ => messages.push(ChatMessage::user(instruction)),
        }
        let request = self.request(messages, self.cfg.act_max_tokens, tool_definitions());

        let response = match self.llm.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                self.model_failure(s, "acting", &e);
                return;
            }
        };
        s.consecutive_failures = 0;

        let calls = response.tool_uses();
        if !calls.is_empty() {
            tracing::debug!(item = item_id, calls = calls.len(), "model requested tools");
            s.conversation.push(ChatMessage::from_content_blocks(Role::Assistant, response.content_blocks));
            s.pending_calls.extend(calls.into_iter().map(PendingCall::from));
            return;
        }

        let text = response.content.trim();
        if text.is_empty() {
            s.consecutive_failures += 1;
            self.malformed("acting", "reply had neither text nor tool calls");
            return;
        }
        s.conversation.push(ChatMessage::assistant(text));
        s.plan.complete(item_id, preview(text, RESULT_PREVIEW_CHARS));
        s.current_item = None;
        if s.plan.pending_count() == 0 {
            tracing::info!(item = item_id, "plan drained by a text reply, goal satisfied");
            s.goal_satisfied = true;
        }
        self.emit_plan(s);
    }

    /// Handle one model-requested call. Returns the approval when the loop
    /// has to suspend.
    async fn process_call(&self, s: &mut SessionState, call: PendingCall) -> Option<PendingApproval> {
        if s.goal_satisfied {
            let skipped = json!({ "skipped": true, "reason": "goal already satisfied" });
            s.record_tool_result(&call.call_id, skipped.to_string(), false);
            return None;
        }

        let Some(tool) = ToolName::parse(&call.tool) else {
            tracing::warn!(tool = %call.tool, "model requested an unknown tool");
            let result = error_payload(&format!("Unknown tool: {}", call.tool), "unknown_tool");
            self.reject_call(s, &call, result);
            return None;
        };

        if tool.needs_approval() {
            let Some(sql) = string_arg(&call.arguments, &["sql", "query"]) else {
                let result = error_payload("execute_query requires a sql argument", "missing_argument");
                self.reject_call(s, &call, result);
                return None;
            };
            let approval = PendingApproval::new(sql, call.call_id.clone(), s.current_item.clone());
            self.enter(s, LoopPhase::AwaitingApproval);
            tracing::info!(call_id = %approval.call_id, "waiting for query approval");
            self.emit(LoopEvent::ApprovalNeeded {
                sql: approval.sql.clone(),
                call_id: approval.call_id.clone(),
                token: approval.token,
            });
            s.pending_approval = Some(approval.clone());
            return Some(approval);
        }

        self.enter(s, LoopPhase::Acting);
        self.emit(LoopEvent::ToolCall {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            arguments: call.arguments.clone(),
        });
        let result = self.gateway.invoke(tool, &call.arguments).await;
        self.observe(s, tool, &call, result).await;
        None
    }

    /// Record an error result for a call that never reached the gateway.
    fn reject_call(&self, s: &mut SessionState, call: &PendingCall, result: Value) {
        self.emit(LoopEvent::ToolCall {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            arguments: call.arguments.clone(),
        });
        self.emit(LoopEvent::ToolResult {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            result: result.clone(),
        });
        s.record_tool_result(&call.call_id, result.to_string(), true);
    }

    async fn observe(&self, s: &mut SessionState, tool: ToolName, call: &PendingCall, result: Value) {
        self.emit(LoopEvent::ToolResult {
            call_id: call.call_id.clone(),
            tool: tool.as_str().to_owned(),
            result: result.clone(),
        });
        let is_error = is_error_payload(&result);
        let recorded = preview(&result.to_string(), self.cfg.reflection_payload_max_chars);
        s.record_tool_result(&call.call_id, recorded, is_error);
        self.absorb(s, tool, &call.arguments, &result);
        self.reflect(s, tool, call, &result).await;
    }

    // ── Reflecting ──

    async fn reflect(&self, s: &mut SessionState, tool: ToolName, call: &PendingCall, result: &Value) {
        self.enter(s, LoopPhase::Reflecting);
        let observed = Observation::classify(tool, result);
        let payload = preview(&result.to_string(), self.cfg.reflection_payload_max_chars);
        let item = s.current_item.as_deref().and_then(|id| s.plan.get(id)).map(|i| i.description.clone());
        let prompt = prompts::reflecting(
            &s.goal,
            item.as_deref(),
            tool.as_str(),
            &call.arguments.to_string(),
            &payload,
            &s.beliefs.describe(),
            &s.plan,
        );

        let parsed = match self.llm.complete(self.standalone(prompt, self.cfg.json_max_tokens)).await {
            Ok(resp) => {
                s.consecutive_failures = 0;
                parse_reflection(&resp.content).map_err(|e| self.malformed("reflecting", e)).ok()
            }
            Err(e) => {
                self.model_failure(s, "reflecting", &e);
                None
            }
        };

        let table = match tool {
            ToolName::ExecuteQuery => {
                string_arg(&call.arguments, &["sql", "query"]).and_then(extract_table_name_heuristic)
            }
            _ => None,
        };

        match parsed {
            Some(reflection) => self.apply_reflection(s, reflection, observed, tool, table.as_deref()),
            None => self.fallback_reflection(s, observed, &payload, table.as_deref()),
        }
        self.emit_plan(s);
    }

    fn apply_reflection(
        &self,
        s: &mut SessionState,
        mut r: Reflection,
        observed: Observation,
        tool: ToolName,
        table: Option<&str>,
    ) {
        if r.goal_satisfied && observed != Observation::Data {
            tracing::info!(?observed, "goal_satisfied ignored for a result without data");
            r.goal_satisfied = false;
        }

        let item_id = s.current_item.clone();
        if let Some(id) = &item_id {
            match r.status {
                ItemVerdict::Completed => {
                    s.plan.complete(id, r.result.clone().unwrap_or_else(|| r.observation.clone()));
                }
                ItemVerdict::Blocked => {
                    s.plan.block(id, r.blocked_reason.clone().unwrap_or_else(|| r.observation.clone()));
                }
                ItemVerdict::Continue => {}
            }
            if s.plan.get(id).is_some_and(|i| i.status.is_terminal()) {
                s.current_item = None;
            }
        }

        for todo in &r.new_todos {
            s.plan.add(todo.description.clone(), todo.priority.max(1));
        }
        if tool == ToolName::ExecuteQuery && observed == Observation::Empty && r.new_todos.is_empty() {
            let added = enqueue_investigation(s, table);
            r.new_todos.extend(added);
        }
        if r.goal_satisfied {
            tracing::info!("reflection reports goal satisfied");
            s.goal_satisfied = true;
        }
        self.emit(LoopEvent::Reflection { item_id, reflection: r, fallback: false });
    }

    /// Deterministic reflection used when the model reply is unusable.
    fn fallback_reflection(&self, s: &mut SessionState, observed: Observation, payload: &str, table: Option<&str>) {
        let (status, observation) = match observed {
            Observation::Data => (ItemVerdict::Completed, preview(payload, RESULT_PREVIEW_CHARS)),
            Observation::Empty => (ItemVerdict::Blocked, "tool returned no data".to_owned()),
            Observation::Error => (ItemVerdict::Blocked, "tool returned an error".to_owned()),
            Observation::Rejected => (ItemVerdict::Blocked, "query rejected by user".to_owned()),
        };

        let item_id = s.current_item.take();
        if let Some(id) = &item_id {
            match status {
                ItemVerdict::Completed => s.plan.complete(id, observation.clone()),
                _ => s.plan.block(id, observation.clone()),
            };
        }

        let new_todos = match observed {
            Observation::Empty | Observation::Error => enqueue_investigation(s, table),
            _ => Vec::new(),
        };
        let completed = status == ItemVerdict::Completed;
        let reflection = Reflection {
            status,
            result: completed.then(|| observation.clone()),
            blocked_reason: (!completed).then(|| observation.clone()),
            observation,
            new_todos,
            goal_satisfied: false,
            next_action: None,
        };
        self.emit(LoopEvent::Reflection { item_id, reflection, fallback: true });
    }

    // ── Synthesizing ──

    async fn synthesize(&self, mut s: SessionState) -> LoopOutcome {
        self.enter(&mut s, LoopPhase::Synthesizing);
        let cancelled = s.plan.cancel_remaining();
        s.current_item = None;
        if cancelled > 0 {
            tracing::debug!(cancelled, "open plan items cancelled");
        }
        self.emit_plan(&s);

        let prompt = prompts::synthesizing(&s.goal, &s.beliefs.describe(), &s.plan.completed_results());
        let reason = match self.llm.complete(self.standalone(prompt, self.cfg.synthesis_max_tokens)).await {
            Ok(resp) if !resp.content.trim().is_empty() => {
                let answer = resp.content.trim().to_owned();
                s.conversation.push(ChatMessage::assistant(answer.clone()));
                self.enter(&mut s, LoopPhase::Done);
                tracing::info!(iterations = s.iteration, "goal answered");
                self.emit(LoopEvent::FinalAnswer { answer: answer.clone() });
                return LoopOutcome::Finished { answer, session: s };
            }
            Ok(_) => "synthesis produced an empty answer".to_owned(),
            Err(e) => {
                self.model_failure(&mut s, "synthesizing", &e);
                format!("synthesis failed: {e}")
            }
        };

        self.emit(LoopEvent::Error { kind: ErrorKind::Aborted, message: reason.clone() });
        self.enter(&mut s, LoopPhase::Aborted);
        LoopOutcome::Aborted { reason, session: s }
    }
}

/// Queue the three investigation items at priorities 1..=3, skipping any
/// already open.
fn enqueue_investigation(s: &mut SessionState, table: Option<&str>) -> Vec<ProposedItem> {
    let mut added = Vec::new();
    for (description, priority) in prompts::investigation_items(table).into_iter().zip(1u32..) {
        let open = s
            .plan
            .items()
            .iter()
            .any(|i| !i.status.is_terminal() && i.description == description);
        if !open {
            s.plan.add(description.clone(), priority);
            added.push(ProposedItem { description, priority });
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RecordingSink;
    use crate::gateway::StaticGateway;
    use scout_llm::provider::MockProvider;

    fn test_loop(sink: Arc<RecordingSink>) -> ExecutionLoop {
        ExecutionLoop::new(
            Arc::new(MockProvider::new("not json")),
            Arc::new(StaticGateway::new()),
            sink,
            ScoutCfg::default(),
        )
    }

    #[test]
    fn observations_are_classified() {
        use ToolName::*;
        assert_eq!(Observation::classify(ExecuteQuery, &json!({"data": [], "row_count": 0})), Observation::Empty);
        assert_eq!(Observation::classify(ExecuteQuery, &json!({"data": [{"n": 1}], "row_count": 1})), Observation::Data);
        assert_eq!(Observation::classify(ListSchemas, &json!({"schemas": []})), Observation::Empty);
        assert_eq!(Observation::classify(ListTables, &json!({"error": "boom"})), Observation::Error);
        assert_eq!(
            Observation::classify(ExecuteQuery, &json!({"success": false, "error": "x", "error_type": REJECTED_BY_USER})),
            Observation::Rejected
        );
        assert_eq!(Observation::classify(InspectSchema, &json!({"columns": []})), Observation::Data);
    }

    #[test]
    fn select_prefers_more_urgent_pending_item() {
        let sink = Arc::new(RecordingSink::new());
        let lp = test_loop(sink);
        let mut s = SessionState::new("g", BeliefStore::new(), "sys");
        s.plan.add("first", 1);
        s.plan.add("second", 2);

        let first = lp.select(&mut s);
        assert_eq!(s.plan.get(&first).map(|i| i.status), Some(PlanStatus::InProgress));
        assert_eq!(lp.select(&mut s), first);

        let urgent = s.plan.add("alternative", URGENT_PRIORITY);
        assert_eq!(lp.select(&mut s), urgent);
        assert_eq!(s.plan.get(&first).map(|i| i.status), Some(PlanStatus::Pending));
    }

    #[test]
    fn select_adds_verification_item_when_dry() {
        let lp = test_loop(Arc::new(RecordingSink::new()));
        let mut s = SessionState::new("g", BeliefStore::new(), "sys");
        let id = lp.select(&mut s);
        let item = s.plan.get(&id).cloned();
        assert_eq!(item.as_ref().map(|i| i.description.as_str()), Some(prompts::FALLBACK_ITEM));
        assert_eq!(item.map(|i| i.status), Some(PlanStatus::InProgress));
    }

    #[test]
    fn investigation_is_not_duplicated() {
        let mut s = SessionState::new("g", BeliefStore::new(), "sys");
        assert_eq!(enqueue_investigation(&mut s, Some("users")).len(), 3);
        assert!(enqueue_investigation(&mut s, Some("users")).is_empty());
        let priorities: Vec<u32> = s.plan.items().iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unparseable_reflection_on_data_completes_item() {
        let sink = Arc::new(RecordingSink::new());
        let lp = test_loop(sink.clone());
        let mut s = SessionState::new("g", BeliefStore::new(), "sys");
        let id = lp.select(&mut s);
        lp.enter(&mut s, LoopPhase::Acting);
        let call = PendingCall {
            call_id: "c1".into(),
            tool: "list_schemas".into(),
            arguments: json!({}),
        };
        lp.observe(&mut s, ToolName::ListSchemas, &call, json!({"schemas": ["public"]})).await;

        assert_eq!(s.plan.get(&id).map(|i| i.status), Some(PlanStatus::Completed));
        assert!(s.current_item.is_none());
        let fallback = sink.events().into_iter().any(|e| matches!(e, LoopEvent::Reflection { fallback: true, .. }));
        assert!(fallback);
        assert!(sink.kinds().contains(&"error"));
    }
}
