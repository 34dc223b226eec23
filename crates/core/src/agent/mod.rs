mod approval;
mod engine;
mod events;
mod phase;
pub mod prompts;
mod session;

pub use approval::{ApprovalDecision, PendingApproval, ResumeError};
pub use engine::{ExecutionLoop, LoopOutcome, REJECTED_BY_USER};
pub use events::{ChannelSink, ErrorKind, EventSink, LoopEvent, RecordingSink, TracingSink};
pub use phase::LoopPhase;
pub use session::{PendingCall, SessionState};
