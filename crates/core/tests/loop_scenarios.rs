//! End-to-end runs of the execution loop without a database or network.
//!
//! The model is faked by routing each request on the phase line of its last
//! message; the database is a `StaticGateway` with canned payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use scout_core::agent::prompts::{
    ACTING_MARKER, ALTERNATIVE_APPROACH, FALLBACK_PLAN, PLANNING_MARKER, REFLECTING_MARKER, SYNTHESIZING_MARKER,
};
use scout_core::agent::{
    ApprovalDecision, ErrorKind, ExecutionLoop, LoopEvent, LoopOutcome, LoopPhase, RecordingSink, ResumeError,
    SessionState,
};
use scout_core::config::ScoutCfg;
use scout_core::gateway::{StaticGateway, ToolName};
use scout_core::plan::{PlanStatus, URGENT_PRIORITY};
use scout_llm::provider::{
    CompletionFuture, CompletionRequest, CompletionResponse, ContentBlock, LlmError, LlmProvider, ScriptedProvider,
};
use serde_json::{Value, json};

type Reply = Result<CompletionResponse, LlmError>;

/// Replies per phase marker. Each queue hands out its entries in order and
/// then keeps repeating the last one.
#[derive(Default)]
struct PhaseModel {
    routes: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl PhaseModel {
    fn new() -> Self {
        Self::default()
    }

    fn on(self, marker: &'static str, reply: Reply) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.entry(marker).or_default().push_back(reply);
        }
        self
    }

    fn requests_for(&self, marker: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.last_text().contains(marker))
            .cloned()
            .collect()
    }
}

impl LlmProvider for PhaseModel {
    fn name(&self) -> &str {
        "phase-model"
    }

    fn complete(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        let text = request.last_text().to_owned();
        self.requests.lock().unwrap().push(request);
        let mut routes = self.routes.lock().unwrap();
        let reply = [PLANNING_MARKER, ACTING_MARKER, REFLECTING_MARKER, SYNTHESIZING_MARKER]
            .into_iter()
            .find(|m| text.contains(m))
            .and_then(|m| routes.get_mut(m))
            .and_then(|q| if q.len() > 1 { q.pop_front() } else { q.front().cloned() })
            .unwrap_or_else(|| Err(LlmError::Unavailable("no route".into())));
        Box::pin(async move { reply })
    }
}

fn text(s: &str) -> Reply {
    Ok(CompletionResponse::text(s))
}

fn tool(id: &str, name: &str, input: Value) -> Reply {
    Ok(CompletionResponse::with_blocks(vec![ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }]))
}

fn reflection(value: Value) -> Reply {
    text(&value.to_string())
}

fn users_db() -> StaticGateway {
    StaticGateway::new()
        .with(ToolName::ListSchemas, json!({"schemas": ["public"]}))
        .with(
            ToolName::ListTables,
            json!({"tables": [{"name": "users", "row_count": 150, "column_count": 3}]}),
        )
        .with(
            ToolName::ExecuteQuery,
            json!({"columns": ["count"], "data": [{"count": 150}], "row_count": 1}),
        )
}

const COUNT_SQL: &str = "SELECT COUNT(*) FROM users";

fn count_model() -> PhaseModel {
    PhaseModel::new()
        .on(PLANNING_MARKER, text(r#"{"todos": [{"description": "Count rows in users", "priority": 1}]}"#))
        .on(ACTING_MARKER, tool("call-1", "execute_query", json!({"sql": COUNT_SQL})))
        .on(
            REFLECTING_MARKER,
            reflection(json!({
                "status": "completed",
                "observation": "count(*) returned 150",
                "result": "users has 150 rows",
                "goal_satisfied": true
            })),
        )
        .on(SYNTHESIZING_MARKER, text("There are 150 users."))
}

struct Harness {
    model: Arc<PhaseModel>,
    gateway: Arc<StaticGateway>,
    sink: Arc<RecordingSink>,
    engine: ExecutionLoop,
}

fn harness(model: PhaseModel, gateway: StaticGateway, cfg: ScoutCfg) -> Harness {
    let model = Arc::new(model);
    let gateway = Arc::new(gateway);
    let sink = Arc::new(RecordingSink::new());
    let engine = ExecutionLoop::new(model.clone(), gateway.clone(), sink.clone(), cfg);
    Harness { model, gateway, sink, engine }
}

fn errors(sink: &RecordingSink) -> Vec<ErrorKind> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            LoopEvent::Error { kind, .. } => Some(kind),
            _ => None,
        })
        .collect()
}

fn expect_suspended(outcome: LoopOutcome) -> (scout_core::agent::PendingApproval, SessionState) {
    match outcome {
        LoopOutcome::Suspended { approval, session } => (approval, session),
        other => panic!("expected suspension, got {other:?}"),
    }
}

fn expect_finished(outcome: LoopOutcome) -> (String, SessionState) {
    match outcome {
        LoopOutcome::Finished { answer, session } => (answer, session),
        other => panic!("expected an answer, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_database_exhausts_budget_then_answers() {
    let model = PhaseModel::new()
        .on(PLANNING_MARKER, text("I would look at the tables first."))
        .on(ACTING_MARKER, tool("call-1", "list_schemas", json!({})))
        .on(
            REFLECTING_MARKER,
            reflection(json!({"status": "continue", "observation": "no schemas", "goal_satisfied": true})),
        )
        .on(SYNTHESIZING_MARKER, text("No database structure was found: there are no user schemas."));
    let gateway = StaticGateway::new().with(ToolName::ListSchemas, json!({"schemas": []}));
    let cfg = ScoutCfg { max_iterations: 3, ..ScoutCfg::default() };
    let h = harness(model, gateway, cfg);

    let (answer, session) = expect_finished(h.engine.start("how many users are there", None).await);

    assert!(answer.contains("no user schemas"));
    assert!(session.beliefs.known_schemas.is_empty());
    assert_eq!(session.iteration, 3);
    assert_eq!(session.phase, LoopPhase::Done);
    assert!(!session.goal_satisfied, "empty results never satisfy the goal");

    let descriptions: Vec<&str> = session.plan.items().iter().take(4).map(|i| i.description.as_str()).collect();
    assert_eq!(descriptions, FALLBACK_PLAN.to_vec());

    let errs = errors(&h.sink);
    assert!(errs.contains(&ErrorKind::MalformedOutput));
    assert!(errs.contains(&ErrorKind::BudgetExhausted));
    assert_eq!(h.gateway.call_count(ToolName::ListSchemas), 4);
    assert_eq!(h.sink.kinds().last(), Some(&"final-answer"));
}

#[tokio::test]
async fn counted_rows_become_verified_beliefs() {
    let h = harness(count_model(), users_db(), ScoutCfg::default());

    let (approval, session) = expect_suspended(h.engine.start("how many users are there", None).await);
    assert_eq!(approval.sql, COUNT_SQL);
    assert_eq!(session.phase, LoopPhase::AwaitingApproval);
    assert_eq!(h.gateway.call_count(ToolName::ExecuteQuery), 0);
    assert_eq!(h.gateway.call_count(ToolName::ListTables), 1);

    let decision = ApprovalDecision::approve(&approval);
    let (answer, session) = expect_finished(h.engine.resume(session, decision).await.unwrap());

    assert_eq!(session.beliefs.verified_row_counts.get("users"), Some(&150));
    assert!(answer.contains("150"));
    assert_eq!(h.gateway.call_count(ToolName::ExecuteQuery), 1);

    let synthesis = h.model.requests_for(SYNTHESIZING_MARKER);
    assert_eq!(synthesis.len(), 1);
    let prompt = synthesis[0].last_text();
    assert!(prompt.contains("users has 150 rows (verified by COUNT)"));
    assert!(prompt.contains("users has 150 rows"));
}

#[tokio::test]
async fn reflection_sees_the_literal_payload() {
    let h = harness(count_model(), users_db(), ScoutCfg::default());
    let (approval, session) = expect_suspended(h.engine.start("how many users are there", None).await);
    h.engine.resume(session, ApprovalDecision::approve(&approval)).await.unwrap();

    let reflections = h.model.requests_for(REFLECTING_MARKER);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0].last_text().contains(r#""data":[{"count":150}]"#));
}

#[tokio::test]
async fn queries_never_run_before_approval() {
    let h = harness(count_model(), users_db(), ScoutCfg::default());
    let outcome = h.engine.start("how many users are there", None).await;
    assert!(matches!(outcome, LoopOutcome::Suspended { .. }));

    let kinds = h.sink.kinds();
    assert_eq!(kinds.last(), Some(&"approval-needed"));
    assert_eq!(h.gateway.call_count(ToolName::ExecuteQuery), 0);
    // dropping the suspended session leaves the query unexecuted
    drop(outcome);
    assert_eq!(h.gateway.call_count(ToolName::ExecuteQuery), 0);
}

#[tokio::test]
async fn rejection_records_disproof_and_urgent_alternative() {
    let model = PhaseModel::new()
        .on(PLANNING_MARKER, text(r#"{"todos": [{"description": "Count rows in users", "priority": 1}]}"#))
        .on(ACTING_MARKER, tool("call-1", "execute_query", json!({"sql": COUNT_SQL})))
        .on(ACTING_MARKER, text("Without running a query the row count is unknown."))
        .on(
            REFLECTING_MARKER,
            reflection(json!({
                "status": "blocked",
                "observation": "the user rejected the query",
                "blocked_reason": "rejected by user",
                "goal_satisfied": false
            })),
        )
        .on(SYNTHESIZING_MARKER, text("I could not count the users because the query was rejected."));
    let h = harness(model, users_db(), ScoutCfg::default());

    let (approval, session) = expect_suspended(h.engine.start("how many users are there", None).await);
    let outcome = h.engine.resume(session, ApprovalDecision::reject(&approval)).await.unwrap();
    let (_, session) = expect_finished(outcome);

    assert_eq!(h.gateway.call_count(ToolName::ExecuteQuery), 0);
    assert!(
        session
            .beliefs
            .disproven_assumptions()
            .contains(&format!("Query was rejected by the user: {COUNT_SQL}"))
    );

    let alt = session.plan.items().iter().find(|i| i.description == ALTERNATIVE_APPROACH).unwrap();
    assert_eq!(alt.priority, URGENT_PRIORITY);
    assert_eq!(alt.status, PlanStatus::Completed);

    let approvals = h.sink.events().iter().filter(|e| matches!(e, LoopEvent::ApprovalNeeded { .. })).count();
    assert_eq!(approvals, 1);

    let rejected_result = h.sink.events().into_iter().find_map(|e| match e {
        LoopEvent::ToolResult { tool, result, .. } if tool == "execute_query" => Some(result),
        _ => None,
    });
    assert_eq!(rejected_result.unwrap()["error_type"], "rejected_by_user");
}

#[tokio::test]
async fn resume_from_json_matches_resume_in_memory() {
    fn model() -> PhaseModel {
        PhaseModel::new()
            .on(PLANNING_MARKER, text(r#"[{"description": "Count users", "priority": 1}]"#))
            .on(ACTING_MARKER, tool("call-1", "execute_query", json!({"sql": COUNT_SQL})))
            .on(
                ACTING_MARKER,
                tool("call-2", "inspect_schema", json!({"table_name": "users", "schema_name": "public"})),
            )
            .on(REFLECTING_MARKER, reflection(json!({"status": "continue", "observation": "150 rows"})))
            .on(
                REFLECTING_MARKER,
                reflection(json!({"status": "completed", "observation": "done", "goal_satisfied": true})),
            )
            .on(SYNTHESIZING_MARKER, text("There are 150 users."))
    }
    fn db() -> StaticGateway {
        users_db().with(ToolName::InspectSchema, json!({"columns": [{"name": "id", "type": "integer"}]}))
    }

    let direct = harness(model(), db(), ScoutCfg::default());
    let (approval, session) = expect_suspended(direct.engine.start("how many users", None).await);
    direct.engine.resume(session, ApprovalDecision::approve(&approval)).await.unwrap();

    let stored = harness(model(), db(), ScoutCfg::default());
    let (_, session) = expect_suspended(stored.engine.start("how many users", None).await);
    let json = session.to_json().unwrap();
    let restored = SessionState::from_json(&json).unwrap();
    assert_eq!(restored, session);
    let pending = restored.pending_approval.clone().unwrap();
    stored.engine.resume(restored, ApprovalDecision::approve(&pending)).await.unwrap();

    let direct_calls = direct.gateway.calls();
    assert_eq!(direct_calls, stored.gateway.calls());
    let after_query: Vec<ToolName> = direct_calls
        .iter()
        .map(|(t, _)| *t)
        .skip_while(|t| *t != ToolName::ExecuteQuery)
        .collect();
    assert_eq!(after_query, vec![ToolName::ExecuteQuery, ToolName::InspectSchema]);
}

#[tokio::test]
async fn zero_rows_trigger_investigation_not_satisfaction() {
    let sql = "SELECT * FROM orders WHERE status = 'lost'";
    let model = PhaseModel::new()
        .on(PLANNING_MARKER, text(r#"{"todos": ["Find lost orders"]}"#))
        .on(ACTING_MARKER, tool("call-1", "execute_query", json!({"sql": sql})))
        .on(
            REFLECTING_MARKER,
            reflection(json!({"status": "completed", "observation": "no lost orders", "goal_satisfied": true})),
        )
        .on(SYNTHESIZING_MARKER, text("No lost orders were found yet; the orders table needs a closer look."));
    let gateway = StaticGateway::new()
        .with(ToolName::ListSchemas, json!({"schemas": ["public"]}))
        .with(ToolName::ListTables, json!({"tables": [{"name": "orders", "row_count": 10, "column_count": 4}]}))
        .with(ToolName::ExecuteQuery, json!({"columns": ["id"], "data": [], "row_count": 0}));
    let cfg = ScoutCfg { max_iterations: 1, ..ScoutCfg::default() };
    let h = harness(model, gateway, cfg);

    let (approval, session) = expect_suspended(h.engine.start("which orders are lost", None).await);
    let (_, session) = expect_finished(h.engine.resume(session, ApprovalDecision::approve(&approval)).await.unwrap());

    assert!(!session.goal_satisfied);
    assert!(
        session
            .beliefs
            .proven_facts()
            .contains(&format!("Query on orders returned 0 rows - investigate: {sql}"))
    );
    let descriptions: Vec<&str> = session.plan.items().iter().map(|i| i.description.as_str()).collect();
    assert!(descriptions.contains(&"Investigate why the query returned no rows"));
    assert!(descriptions.contains(&"Check the row count of orders"));
    assert!(descriptions.contains(&"Sample rows from orders without filters"));
    assert!(errors(&h.sink).contains(&ErrorKind::BudgetExhausted));
}

#[tokio::test]
async fn model_failures_are_recoverable() {
    let model = PhaseModel::new()
        .on(PLANNING_MARKER, Err(LlmError::RequestFailed("connection reset".into())))
        .on(ACTING_MARKER, Err(LlmError::RateLimited))
        .on(ACTING_MARKER, text("The known structure settles this step."))
        .on(SYNTHESIZING_MARKER, text("The database has one schema, public."));
    let h = harness(model, users_db(), ScoutCfg::default());

    let (answer, session) = expect_finished(h.engine.start("what schemas exist", None).await);

    assert_eq!(answer, "The database has one schema, public.");
    assert_eq!(session.consecutive_failures, 0);
    let model_errors = errors(&h.sink).into_iter().filter(|k| *k == ErrorKind::ModelCall).count();
    assert_eq!(model_errors, 2);
    assert!(session.plan.items().iter().take(4).all(|i| i.status == PlanStatus::Completed));
    assert!(session.goal_satisfied);
}

#[tokio::test]
async fn repeated_failures_force_synthesis_then_abort() {
    // planning fails, two acting calls fail, synthesis fails
    let model = Arc::new(ScriptedProvider::new(vec![
        Err(LlmError::RequestFailed("down".into())),
        Err(LlmError::RequestFailed("down".into())),
        Err(LlmError::RequestFailed("down".into())),
    ]));
    let sink = Arc::new(RecordingSink::new());
    let cfg = ScoutCfg { max_consecutive_model_failures: 3, ..ScoutCfg::default() };
    let engine = ExecutionLoop::new(model.clone(), Arc::new(users_db()), sink.clone(), cfg);

    let outcome = engine.start("how many users", None).await;
    let LoopOutcome::Aborted { reason, session } = outcome else {
        panic!("expected abort");
    };
    assert!(reason.starts_with("synthesis failed"));
    assert_eq!(session.phase, LoopPhase::Aborted);
    assert_eq!(session.iteration, 2);
    // beliefs from assessment survive the failure
    assert!(session.beliefs.known_schemas.contains("public"));

    let errs = errors(&sink);
    assert!(errs.contains(&ErrorKind::FailureLimit));
    assert_eq!(errs.last(), Some(&ErrorKind::Aborted));
    assert_eq!(model.requests().len(), 4);
}

#[tokio::test]
async fn resume_rejects_stale_or_forged_decisions() {
    let h = harness(count_model(), users_db(), ScoutCfg::default());
    let (approval, session) = expect_suspended(h.engine.start("how many users are there", None).await);

    let mut forged = ApprovalDecision::approve(&approval);
    forged.sql = "SELECT * FROM users".into();
    assert_eq!(session.check_decision(&forged), Err(ResumeError::SqlMismatch));
    let err = h.engine.resume(session.clone(), forged).await.unwrap_err();
    assert_eq!(err, ResumeError::SqlMismatch);
    assert_eq!(h.gateway.call_count(ToolName::ExecuteQuery), 0);

    let (_, finished) =
        expect_finished(h.engine.resume(session, ApprovalDecision::approve(&approval)).await.unwrap());
    let again = h.engine.resume(finished, ApprovalDecision::approve(&approval)).await.unwrap_err();
    assert_eq!(again, ResumeError::NothingPending);
}

#[tokio::test]
async fn phases_are_announced_in_order() {
    let h = harness(count_model(), users_db(), ScoutCfg::default());
    let _ = h.engine.start("how many users are there", None).await;

    let phases: Vec<LoopPhase> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LoopEvent::PhaseChange { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            LoopPhase::Assessing,
            LoopPhase::Planning,
            LoopPhase::Selecting,
            LoopPhase::Acting,
            LoopPhase::AwaitingApproval
        ]
    );
}
