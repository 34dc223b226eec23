use serde::{Deserialize, Serialize};

/// Reserved for items the approval gate enqueues; model items start at 1.
pub const URGENT_PRIORITY: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Blocked | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub description: String,
    /// Lower is more urgent.
    pub priority: u32,
    pub status: PlanStatus,
    pub result: Option<String>,
    pub blocked_reason: Option<String>,
}

/// Ordered work items. Selection is priority first, insertion order second;
/// there are no dependencies between items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanQueue {
    items: Vec<PlanItem>,
    next_seq: u64,
}

impl PlanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending item and return its id.
    pub fn add(&mut self, description: impl Into<String>, priority: u32) -> String {
        self.next_seq += 1;
        let id = format!("todo-{}", self.next_seq);
        self.items.push(PlanItem {
            id: id.clone(),
            description: description.into(),
            priority,
            status: PlanStatus::Pending,
            result: None,
            blocked_reason: None,
        });
        id
    }

    /// Pending item with the smallest priority; earliest added wins ties.
    pub fn next(&self) -> Option<&PlanItem> {
        self.items
            .iter()
            .filter(|i| i.status == PlanStatus::Pending)
            .min_by_key(|i| i.priority)
    }

    /// Pending → InProgress.
    pub fn begin(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(item) if item.status == PlanStatus::Pending => {
                item.status = PlanStatus::InProgress;
                true
            }
            _ => false,
        }
    }

    /// InProgress → Pending, used when a more urgent item preempts it.
    pub fn requeue(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(item) if item.status == PlanStatus::InProgress => {
                item.status = PlanStatus::Pending;
                true
            }
            _ => false,
        }
    }

    /// No-op (returns false) when the item is absent or already terminal.
    pub fn complete(&mut self, id: &str, result: impl Into<String>) -> bool {
        match self.live_mut(id) {
            Some(item) => {
                item.status = PlanStatus::Completed;
                item.result = Some(result.into());
                true
            }
            None => false,
        }
    }

    pub fn block(&mut self, id: &str, reason: impl Into<String>) -> bool {
        match self.live_mut(id) {
            Some(item) => {
                item.status = PlanStatus::Blocked;
                item.blocked_reason = Some(reason.into());
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self, id: &str) -> bool {
        match self.live_mut(id) {
            Some(item) => {
                item.status = PlanStatus::Cancelled;
                true
            }
            None => false,
        }
    }

    /// Cancel every non-terminal item; returns how many changed.
    pub fn cancel_remaining(&mut self) -> usize {
        let mut n = 0;
        for item in self.items.iter_mut().filter(|i| !i.status.is_terminal()) {
            item.status = PlanStatus::Cancelled;
            n += 1;
        }
        n
    }

    pub fn get(&self, id: &str) -> Option<&PlanItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut PlanItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    fn live_mut(&mut self, id: &str) -> Option<&mut PlanItem> {
        self.get_mut(id).filter(|i| !i.status.is_terminal())
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|i| i.status == PlanStatus::Pending).count()
    }

    pub fn in_progress(&self) -> Option<&PlanItem> {
        self.items.iter().find(|i| i.status == PlanStatus::InProgress)
    }

    /// `(description, result)` of completed items, in insertion order.
    pub fn completed_results(&self) -> Vec<(&str, &str)> {
        self.items
            .iter()
            .filter(|i| i.status == PlanStatus::Completed)
            .map(|i| (i.description.as_str(), i.result.as_deref().unwrap_or("")))
            .collect()
    }

    /// One line per item for prompts: `[status] (p1) todo-3: description`.
    pub fn render(&self) -> String {
        if self.items.is_empty() {
            return "(no plan items)".to_owned();
        }
        self.items
            .iter()
            .map(|i| {
                let mut line = format!("[{}] (p{}) {}: {}", i.status.as_str(), i.priority, i.id, i.description);
                if let Some(r) = &i.result {
                    line.push_str(&format!(" => {r}"));
                }
                if let Some(r) = &i.blocked_reason {
                    line.push_str(&format!(" (blocked: {r})"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_picks_lowest_priority_then_fifo() {
        let mut q = PlanQueue::new();
        let a = q.add("a", 2);
        let b = q.add("b", 1);
        let c = q.add("c", 1);
        assert_eq!(q.next().map(|i| i.id.clone()), Some(b.clone()));
        q.begin(&b);
        assert_eq!(q.next().map(|i| i.id.clone()), Some(c.clone()));
        q.complete(&c, "done");
        assert_eq!(q.next().map(|i| i.id.clone()), Some(a));
    }

    #[test]
    fn urgent_items_jump_the_queue() {
        let mut q = PlanQueue::new();
        q.add("model item", 1);
        let urgent = q.add("alternative approach", URGENT_PRIORITY);
        assert_eq!(q.next().map(|i| i.id.as_str()), Some(urgent.as_str()));
    }

    #[test]
    fn requeue_only_from_in_progress() {
        let mut q = PlanQueue::new();
        let id = q.add("x", 1);
        assert!(!q.requeue(&id));
        q.begin(&id);
        assert!(q.requeue(&id));
        assert_eq!(q.get(&id).unwrap().status, PlanStatus::Pending);
        q.complete(&id, "done");
        assert!(!q.requeue(&id));
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut q = PlanQueue::new();
        let id = q.add("x", 1);
        assert!(q.complete(&id, "first"));
        assert!(!q.complete(&id, "second"));
        assert!(!q.block(&id, "nope"));
        assert!(!q.cancel(&id));
        assert!(!q.begin(&id));
        let item = q.get(&id).unwrap();
        assert_eq!(item.status, PlanStatus::Completed);
        assert_eq!(item.result.as_deref(), Some("first"));
        assert!(item.blocked_reason.is_none());

        let blocked = q.add("y", 1);
        assert!(q.block(&blocked, "no table"));
        assert!(!q.complete(&blocked, "late"));
        assert!(q.get(&blocked).unwrap().result.is_none());
    }

    #[test]
    fn absent_ids_are_no_ops() {
        let mut q = PlanQueue::new();
        assert!(!q.complete("todo-99", "r"));
        assert!(!q.block("todo-99", "r"));
    }

    #[test]
    fn ids_stay_unique() {
        let mut q = PlanQueue::new();
        let ids: Vec<String> = (0..5).map(|i| q.add(format!("item {i}"), 1)).collect();
        let mut dedup = ids.clone();
        dedup.dedup();
        assert_eq!(ids, dedup);
        assert_eq!(ids[0], "todo-1");
    }

    #[test]
    fn cancel_remaining_skips_terminal() {
        let mut q = PlanQueue::new();
        let a = q.add("a", 1);
        q.add("b", 2);
        let c = q.add("c", 3);
        q.complete(&a, "ok");
        q.begin(&c);
        assert_eq!(q.cancel_remaining(), 2);
        assert_eq!(q.pending_count(), 0);
        assert_eq!(q.completed_results(), vec![("a", "ok")]);
    }
}
