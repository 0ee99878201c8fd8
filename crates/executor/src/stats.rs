use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Point-in-time counters over all tracked tasks. Computed by scanning
/// the task table, which is fine at the expected scale (thousands of
/// tasks, bounded by the retention window).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutorStats {
    /// Tasks currently `running`.
    pub active_count: usize,
    /// Tasks waiting in the pending queue.
    pub queued_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}
