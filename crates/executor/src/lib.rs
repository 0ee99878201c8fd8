//! # Toolcore Executor
//!
//! Deduplicating, concurrency-bounded execution of named tool
//! invocations, with large outputs persisted through the content store.
//!
//! ## Flow
//!
//! ```text
//! InvokeRequest
//!     │
//!     ├──> Input hash (canonical JSON)
//!     │      ├─> completed task  → cache hit, no handler call
//!     │      └─> in-flight task  → join its outcome
//!     │
//!     ├──> Concurrency gate
//!     │      ├─> below limit → run handler (timeout + retry)
//!     │      └─> at limit    → priority queue, FIFO within class
//!     │
//!     └──> Output
//!            ├─> ≤ 4096 bytes → inline in the result
//!            └─> larger       → ContentStore, returned by ref
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use toolcore_content_store::ContentStore;
//! use toolcore_executor::{ExecutorConfig, InvokeRequest, TaskExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ContentStore::open("/var/lib/toolcore/store").await?;
//!     let executor = TaskExecutor::new(store, ExecutorConfig::from_env());
//!
//!     executor.register_fn("echo", |args, _trace_id| async move {
//!         Ok(args["msg"].clone())
//!     });
//!
//!     let result = executor
//!         .execute(InvokeRequest::new("echo", json!({"msg": "hi"}), "trace-1"))
//!         .await;
//!     println!("{result:?}");
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod executor;
mod hash;
mod queue;
mod registry;
mod stats;
mod task;

pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};
pub use executor::TaskExecutor;
pub use hash::input_hash;
pub use registry::{handler_fn, Handler};
pub use stats::ExecutorStats;
pub use task::{Task, TaskCheckpoint, TaskStatus};

// Re-export the protocol shapes callers hold on to.
pub use toolcore_protocol::{
    ErrorCode, ErrorEnvelope, InvokeMeta, InvokeOptions, InvokeRequest, InvokeResult, Priority,
};
