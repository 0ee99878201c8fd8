use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod limits;
pub mod refs;

pub use refs::{
    derive_preview, is_textual_mime, ContentRef, InvalidRef, PageRequest, PagedContent,
    StoredArtifact,
};

pub const PROTOCOL_SCHEMA_VERSION: u32 = 1;

/// Scheduling class for a tool invocation. Higher classes drain first
/// when the executor is saturated; within a class order is FIFO.
#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Numeric level used for queue ordering: low=0, normal=1, high=2.
    pub fn level(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Handler returned an error, panicked, timed out, or is not registered.
    ExecutionError,
    /// The artifact store failed while persisting or reading an output.
    StoreIoError,
    /// The executor's pending queue is at capacity.
    QueueFull,
    /// The request failed validation before reaching a handler.
    InvalidRequest,
    /// Referenced entity does not exist. Reserved for gateway lookups;
    /// engine reads signal absence with `None` instead.
    NotFound,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    pub fn store_io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreIoError, message)
    }

    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueueFull, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Per-invocation knobs. Everything is optional; absent fields fall back
/// to executor defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(default)]
pub struct InvokeOptions {
    /// Per-attempt wall clock budget. Clamped to
    /// [`limits::MIN_TIMEOUT_MS`]..=[`limits::MAX_TIMEOUT_MS`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Largest output (serialized bytes) returned inline. Bigger outputs
    /// are persisted to the artifact store and returned by ref.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_size: Option<usize>,
    /// Force the output into the artifact store even when it would fit
    /// inline.
    pub return_ref: bool,
    pub priority: Priority,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct InvokeRequest {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub options: InvokeOptions,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl InvokeRequest {
    pub fn new(
        tool_name: impl Into<String>,
        args: serde_json::Value,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            options: InvokeOptions::default(),
            trace_id: trace_id.into(),
            user_id: None,
        }
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.options.priority = priority;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct InvokeMeta {
    pub tool_name: String,
    /// Wall clock of the winning attempt. Zero when the result was served
    /// from the dedup cache.
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub trace_id: String,
}

/// Outcome of a tool invocation. Failures travel in `error`, never as a
/// transport-level fault; exactly one of `data` and `artifact` is set on
/// success.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct InvokeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StoredArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    pub meta: InvokeMeta,
}

impl InvokeResult {
    pub fn inline(data: serde_json::Value, meta: InvokeMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            artifact: None,
            error: None,
            meta,
        }
    }

    pub fn stored(artifact: StoredArtifact, meta: InvokeMeta) -> Self {
        Self {
            success: true,
            data: None,
            artifact: Some(artifact),
            error: None,
            meta,
        }
    }

    pub fn failure(error: ErrorEnvelope, meta: InvokeMeta) -> Self {
        Self {
            success: false,
            data: None,
            artifact: None,
            error: Some(error),
            meta,
        }
    }
}
