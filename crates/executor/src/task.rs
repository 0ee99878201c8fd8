use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use toolcore_protocol::{ContentRef, ErrorEnvelope, Priority};

/// Task lifecycle: `pending → queued → running → {completed | failed}`.
/// There is no cancelled state; the only way out of `running` is the
/// handler resolving, failing or timing out.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// A live task holds the dedup entry for its input hash; duplicate
    /// requests join it instead of executing again.
    #[must_use]
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

/// One invocation attempt, identified by its input hash for dedup. Created
/// by `execute()` and never recycled.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct Task {
    pub id: u64,
    pub tool_name: String,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub priority: Priority,
    /// Retries consumed so far (incremented per re-attempt).
    pub retries: u32,
    pub max_retries: u32,
    pub created_at_unix_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_unix_ms: Option<u64>,
    /// Set when the output was persisted to the artifact store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<ContentRef>,
    /// Set when the output was small enough to stay inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    /// Dedup key: sha256 of the canonical JSON of `{tool, args}`.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ref: Option<ContentRef>,
    pub trace_id: String,
}

/// Partial-progress snapshot persisted by a long-running handler. Latest
/// checkpoint per task wins; applying one on resume is the handler's call.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct TaskCheckpoint {
    pub task_id: u64,
    pub status: TaskStatus,
    /// Fraction complete, clamped to 0..=1.
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_ref: Option<ContentRef>,
    pub recorded_at_unix_ms: u64,
}
