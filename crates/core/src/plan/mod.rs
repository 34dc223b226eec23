mod parse;
mod queue;

pub use parse::{ItemVerdict, ParseFailure, ParsedPlan, ProposedItem, Reflection, parse_plan, parse_reflection};
pub use queue::{PlanItem, PlanQueue, PlanStatus, URGENT_PRIORITY};
