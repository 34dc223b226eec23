//! Approval gate: the only point where the loop hands control back to the
//! caller mid-goal.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A query waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub sql: String,
    pub call_id: String,
    pub token: Uuid,
    /// Plan item that was being worked on when the query was proposed.
    pub item_id: Option<String>,
}

impl PendingApproval {
    pub fn new(sql: impl Into<String>, call_id: impl Into<String>, item_id: Option<String>) -> Self {
        Self {
            sql: sql.into(),
            call_id: call_id.into(),
            token: Uuid::new_v4(),
            item_id,
        }
    }

    /// A decision must echo back the exact token, call id and SQL.
    pub fn check(&self, decision: &ApprovalDecision) -> Result<(), ResumeError> {
        if decision.token != self.token {
            return Err(ResumeError::TokenMismatch);
        }
        if decision.call_id != self.call_id {
            return Err(ResumeError::CallIdMismatch {
                expected: self.call_id.clone(),
                got: decision.call_id.clone(),
            });
        }
        if decision.sql != self.sql {
            return Err(ResumeError::SqlMismatch);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub sql: String,
    pub call_id: String,
    pub token: Uuid,
}

impl ApprovalDecision {
    pub fn approve(pending: &PendingApproval) -> Self {
        Self::decide(pending, true)
    }

    pub fn reject(pending: &PendingApproval) -> Self {
        Self::decide(pending, false)
    }

    fn decide(pending: &PendingApproval, approved: bool) -> Self {
        Self {
            approved,
            sql: pending.sql.clone(),
            call_id: pending.call_id.clone(),
            token: pending.token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResumeError {
    #[error("session is not waiting for approval")]
    NothingPending,
    #[error("resume token does not match the pending approval")]
    TokenMismatch,
    #[error("call id mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: String, got: String },
    #[error("SQL text differs from the query that was proposed")]
    SqlMismatch,
}
