use toolcore_protocol::limits;

const MAX_EXECUTOR_CONCURRENCY: usize = 256;

/// Tuning for one [`crate::TaskExecutor`]. `from_env` layers operator
/// overrides on top of the defaults.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Handlers with a `running` task at any instant.
    pub concurrency_limit: usize,
    /// Per-attempt wall clock budget when the request carries none.
    pub default_timeout_ms: u64,
    /// Serialized outputs above this many bytes go to the artifact store.
    pub inline_threshold_bytes: usize,
    /// Extra attempts after a failed or timed-out first attempt.
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff_base_ms * 2^n`, capped.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// `None` preserves the unbounded backpressure queue; `Some(depth)`
    /// rejects excess requests with `QUEUE_FULL`.
    pub max_queue_depth: Option<usize>,
    /// Finished (completed or failed) tasks retained for dedup cache
    /// hits. `0` means unbounded.
    pub max_finished_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            default_timeout_ms: limits::DEFAULT_TIMEOUT_MS,
            inline_threshold_bytes: limits::INLINE_THRESHOLD_BYTES,
            max_retries: 2,
            backoff_base_ms: 250,
            backoff_cap_ms: 5_000,
            max_queue_depth: None,
            max_finished_tasks: 4_096,
        }
    }
}

impl ExecutorConfig {
    /// Defaults with operator overrides from the environment
    /// (`TOOLCORE_EXECUTOR_CONCURRENCY`).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let raw = std::env::var("TOOLCORE_EXECUTOR_CONCURRENCY").ok();
        config.concurrency_limit =
            parse_concurrency(raw.as_deref(), config.concurrency_limit);
        config
    }
}

fn parse_concurrency(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_EXECUTOR_CONCURRENCY)
}
