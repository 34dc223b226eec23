use std::fmt;

use serde::{Deserialize, Serialize};

/// States of the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Assessing,
    Planning,
    Selecting,
    Acting,
    AwaitingApproval,
    Reflecting,
    Synthesizing,
    Done,
    Aborted,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        matches!(
            (self, next),
            (Assessing, Planning)
                | (Planning, Selecting)
                | (Planning, Synthesizing)
                | (Selecting, Acting)
                | (Selecting, Synthesizing)
                // free-text reply or failed model call
                | (Acting, Selecting)
                | (Acting, Reflecting)
                | (Acting, AwaitingApproval)
                | (Acting, Synthesizing)
                | (AwaitingApproval, Reflecting)
                | (Reflecting, Acting)
                | (Reflecting, AwaitingApproval)
                | (Reflecting, Selecting)
                | (Reflecting, Synthesizing)
                | (Synthesizing, Done)
                | (Synthesizing, Aborted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assessing => "assessing",
            Self::Planning => "planning",
            Self::Selecting => "selecting",
            Self::Acting => "acting",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Reflecting => "reflecting",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_only_resumes_into_reflection() {
        assert!(LoopPhase::AwaitingApproval.can_transition_to(LoopPhase::Reflecting));
        assert!(!LoopPhase::AwaitingApproval.can_transition_to(LoopPhase::Acting));
        assert!(!LoopPhase::AwaitingApproval.can_transition_to(LoopPhase::Synthesizing));
    }

    #[test]
    fn terminal_phases_go_nowhere() {
        for next in [LoopPhase::Assessing, LoopPhase::Selecting, LoopPhase::Synthesizing] {
            assert!(!LoopPhase::Done.can_transition_to(next));
            assert!(!LoopPhase::Aborted.can_transition_to(next));
        }
        assert!(LoopPhase::Done.is_terminal());
    }

    #[test]
    fn assessing_runs_once() {
        let all = [
            LoopPhase::Planning, LoopPhase::Selecting, LoopPhase::Acting, LoopPhase::AwaitingApproval,
            LoopPhase::Reflecting, LoopPhase::Synthesizing, LoopPhase::Done, LoopPhase::Aborted,
        ];
        assert!(all.iter().all(|p| !p.can_transition_to(LoopPhase::Assessing)));
    }
}
