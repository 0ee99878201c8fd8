use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::hash::input_hash;
use crate::queue::PendingQueue;
use crate::registry::{handler_fn, Handler, HandlerRegistry};
use crate::stats::ExecutorStats;
use crate::task::{Task, TaskCheckpoint, TaskStatus};
use log::{debug, warn};
use lru::LruCache;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use toolcore_content_store::ContentStore;
use toolcore_protocol::{
    limits, ErrorEnvelope, InvokeMeta, InvokeOptions, InvokeRequest, InvokeResult, StoredArtifact,
};

const OUTPUT_MIME: &str = "application/json";

/// What a finished attempt produced, published once to every waiter.
#[derive(Debug, Clone)]
enum OutcomePayload {
    Inline(Value),
    Stored(StoredArtifact),
    Failed(ErrorEnvelope),
}

#[derive(Debug, Clone)]
struct TaskOutcome {
    payload: OutcomePayload,
    /// Wall clock of the winning (or last failing) attempt.
    execution_time_ms: u64,
}

impl TaskOutcome {
    fn failed(error: ErrorEnvelope, execution_time_ms: u64) -> Self {
        Self {
            payload: OutcomePayload::Failed(error),
            execution_time_ms,
        }
    }
}

/// Deduplicating, concurrency-bounded task execution over a
/// [`ContentStore`].
///
/// Identical requests (same tool name, same args after JSON
/// canonicalization) execute the underlying handler at most once per
/// distinct input: completed tasks serve cache hits, live tasks absorb
/// duplicate callers as joiners of the one in-flight execution. Requests
/// past the concurrency limit wait in a priority queue instead of being
/// rejected.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    store: ContentStore,
    config: ExecutorConfig,
    // Never held across an await; dedup check plus task registration is
    // one critical section.
    state: Mutex<ExecutorState>,
}

struct ExecutorState {
    registry: HandlerRegistry,
    tasks: HashMap<u64, Task>,
    /// input hash -> task id of the task holding that key.
    dedup: HashMap<String, u64>,
    checkpoints: HashMap<u64, TaskCheckpoint>,
    /// Outcome publishers for live tasks; removed once published.
    outcomes: HashMap<u64, watch::Sender<Option<TaskOutcome>>>,
    /// Request options needed again at run time; removed at finish.
    run_options: HashMap<u64, InvokeOptions>,
    queue: PendingQueue,
    /// Retention window over finished task ids. Evicting one drops the
    /// task, its checkpoint and its dedup entry.
    finished: LruCache<u64, ()>,
    running: usize,
    next_task_id: u64,
}

/// Where `execute` landed after the admission critical section.
enum Admission {
    CachedInline(Value),
    CachedStored(StoredArtifact),
    /// Duplicate of a live task; wait for its outcome.
    Join(watch::Receiver<Option<TaskOutcome>>),
    /// Admitted below the concurrency limit; run now.
    Run {
        task_id: u64,
        rx: watch::Receiver<Option<TaskOutcome>>,
    },
    /// Parked in the pending queue; a finishing task will start it.
    Queued {
        rx: watch::Receiver<Option<TaskOutcome>>,
    },
    Rejected(ErrorEnvelope),
}

impl TaskExecutor {
    #[must_use]
    pub fn new(store: ContentStore, config: ExecutorConfig) -> Self {
        let finished = match NonZeroUsize::new(config.max_finished_tasks) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Arc::new(ExecutorInner {
                store,
                config,
                state: Mutex::new(ExecutorState {
                    registry: HandlerRegistry::default(),
                    tasks: HashMap::new(),
                    dedup: HashMap::new(),
                    checkpoints: HashMap::new(),
                    outcomes: HashMap::new(),
                    run_options: HashMap::new(),
                    queue: PendingQueue::default(),
                    finished,
                    running: 0,
                    next_task_id: 1,
                }),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.inner.store
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Bind `tool_name` to a handler. Last write wins; replacement is
    /// logged loudly by the registry.
    pub fn register_handler(&self, tool_name: &str, handler: Arc<dyn Handler>) {
        self.lock_state().registry.register(tool_name, handler);
    }

    /// [`register_handler`](Self::register_handler) for plain async
    /// closures.
    pub fn register_fn<F, Fut>(&self, tool_name: &str, f: F)
    where
        F: Fn(Value, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_handler(tool_name, handler_fn(f));
    }

    #[must_use]
    pub fn registered_tools(&self) -> Vec<String> {
        self.lock_state().registry.registered_names()
    }

    /// Run one invocation. Never returns an error: every failure travels
    /// as `{success: false, error}` in the result.
    pub async fn execute(&self, request: InvokeRequest) -> InvokeResult {
        let InvokeRequest {
            tool_name,
            args,
            options,
            trace_id,
            user_id: _,
        } = request;

        if let Err(e) = limits::validate_tool_name(&tool_name) {
            return InvokeResult::failure(
                ErrorEnvelope::invalid_request(e.to_string()),
                meta(&tool_name, 0, false, &trace_id),
            );
        }

        let hash = input_hash(&tool_name, &args);
        let admission = self.admit(&tool_name, args, options, &trace_id, hash);

        match admission {
            Admission::CachedInline(data) => {
                debug!("{tool_name}: cache hit (inline)");
                InvokeResult::inline(data, meta(&tool_name, 0, true, &trace_id))
            }
            Admission::CachedStored(artifact) => {
                debug!("{tool_name}: cache hit ({})", artifact.content_ref);
                InvokeResult::stored(artifact, meta(&tool_name, 0, true, &trace_id))
            }
            Admission::Join(rx) => {
                debug!("{tool_name}: joining in-flight duplicate");
                let outcome = await_outcome(rx).await;
                // Nothing executed on this caller's behalf.
                result_from_outcome(outcome.payload, meta(&tool_name, 0, true, &trace_id))
            }
            Admission::Run { task_id, rx } => {
                let executor = self.clone();
                tokio::spawn(async move { executor.run_task(task_id).await });
                let outcome = await_outcome(rx).await;
                result_from_outcome(
                    outcome.payload,
                    meta(&tool_name, outcome.execution_time_ms, false, &trace_id),
                )
            }
            Admission::Queued { rx } => {
                let outcome = await_outcome(rx).await;
                result_from_outcome(
                    outcome.payload,
                    meta(&tool_name, outcome.execution_time_ms, false, &trace_id),
                )
            }
            Admission::Rejected(error) => {
                InvokeResult::failure(error, meta(&tool_name, 0, false, &trace_id))
            }
        }
    }

    /// Dedup lookup plus task registration, atomically under the state
    /// lock so two identical requests can never both miss.
    fn admit(
        &self,
        tool_name: &str,
        args: Value,
        options: InvokeOptions,
        trace_id: &str,
        hash: String,
    ) -> Admission {
        let config = &self.inner.config;
        let mut state = self.lock_state();

        if let Some(admission) = dedup_lookup(&mut state, &self.inner.store, &hash) {
            return admission;
        }

        let task_id = state.next_task_id;
        state.next_task_id += 1;
        let now = unix_now_ms();
        let priority = options.priority;
        let mut task = Task {
            id: task_id,
            tool_name: tool_name.to_string(),
            status: TaskStatus::Pending,
            input: args,
            priority,
            retries: 0,
            max_retries: config.max_retries,
            created_at_unix_ms: now,
            started_at_unix_ms: None,
            completed_at_unix_ms: None,
            output_ref: None,
            output: None,
            error: None,
            content_hash: hash.clone(),
            checkpoint_ref: None,
            trace_id: trace_id.to_string(),
        };

        if state.running < config.concurrency_limit {
            task.status = TaskStatus::Running;
            task.started_at_unix_ms = Some(now);
            state.running += 1;
            let (tx, rx) = watch::channel(None);
            state.outcomes.insert(task_id, tx);
            state.run_options.insert(task_id, options);
            state.dedup.insert(hash, task_id);
            state.tasks.insert(task_id, task);
            return Admission::Run { task_id, rx };
        }

        if let Some(depth) = config.max_queue_depth {
            if state.queue.len() >= depth {
                let error = ErrorEnvelope::queue_full(format!(
                    "pending queue is full ({depth} waiting)"
                ));
                task.status = TaskStatus::Failed;
                task.completed_at_unix_ms = Some(now);
                task.error = Some(error.clone());
                // Recorded for stats, but never a dedup target: the same
                // input should execute once there is room again.
                state.tasks.insert(task_id, task);
                retain_finished(&mut state, task_id);
                warn!("{tool_name}: rejected, {depth} requests already queued");
                return Admission::Rejected(error);
            }
        }

        task.status = TaskStatus::Queued;
        let (tx, rx) = watch::channel(None);
        state.outcomes.insert(task_id, tx);
        state.run_options.insert(task_id, options);
        state.dedup.insert(hash, task_id);
        state.tasks.insert(task_id, task);
        state.queue.push(task_id, priority);
        debug!("{tool_name}: queued (depth {})", state.queue.len());
        Admission::Queued { rx }
    }

    /// Drive one admitted task to its outcome, publish it and drain the
    /// queue. Runs on its own spawned tokio task so an abandoned caller
    /// never strands the concurrency slot.
    async fn run_task(&self, task_id: u64) {
        let (handler, tool_name, args, trace_id, options) = {
            let state = self.lock_state();
            let Some(task) = state.tasks.get(&task_id) else {
                warn!("task {task_id} vanished before execution");
                return;
            };
            (
                state.registry.get(&task.tool_name),
                task.tool_name.clone(),
                task.input.clone(),
                task.trace_id.clone(),
                state.run_options.get(&task_id).cloned().unwrap_or_default(),
            )
        };

        let outcome = self
            .run_attempts(task_id, handler, &tool_name, args, &trace_id, &options)
            .await;
        self.finish_task(task_id, outcome);
    }

    /// Execute with timeout and bounded exponential backoff retry.
    async fn run_attempts(
        &self,
        task_id: u64,
        handler: Option<Arc<dyn Handler>>,
        tool_name: &str,
        args: Value,
        trace_id: &str,
        options: &InvokeOptions,
    ) -> TaskOutcome {
        let Some(handler) = handler else {
            // Not worth retrying; registration will not appear mid-task.
            return TaskOutcome::failed(
                ErrorEnvelope::execution(format!("no handler registered for {tool_name:?}")),
                0,
            );
        };

        let config = &self.inner.config;
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(config.default_timeout_ms)
            .clamp(limits::MIN_TIMEOUT_MS, limits::MAX_TIMEOUT_MS);
        let timeout = Duration::from_millis(timeout_ms);
        let mut attempt = 0u32;

        loop {
            let attempt_start = Instant::now();
            let attempt_result =
                tokio::time::timeout(timeout, handler.call(args.clone(), trace_id)).await;
            let elapsed_ms = elapsed_ms(attempt_start);

            let message = match attempt_result {
                Ok(Ok(value)) => {
                    return self.persist_output(task_id, value, options, elapsed_ms).await;
                }
                Ok(Err(e)) => format!("handler failed: {e:#}"),
                Err(_) => format!("handler timed out after {timeout_ms} ms"),
            };

            if attempt >= config.max_retries {
                if config.max_retries > 0 {
                    warn!("{tool_name} task {task_id}: giving up after {attempt} retries: {message}");
                }
                return TaskOutcome::failed(ErrorEnvelope::execution(message), elapsed_ms);
            }

            let delay = config
                .backoff_base_ms
                .saturating_mul(1u64 << attempt.min(32))
                .min(config.backoff_cap_ms);
            attempt += 1;
            {
                let mut state = self.lock_state();
                if let Some(task) = state.tasks.get_mut(&task_id) {
                    task.retries = attempt;
                }
            }
            warn!(
                "{tool_name} task {task_id}: attempt {attempt} of {} in {delay} ms: {message}",
                config.max_retries
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    /// Inline small serialized outputs; persist the rest to the artifact
    /// store and answer with the descriptor.
    async fn persist_output(
        &self,
        task_id: u64,
        value: Value,
        options: &InvokeOptions,
        execution_time_ms: u64,
    ) -> TaskOutcome {
        let bytes = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                return TaskOutcome::failed(
                    ErrorEnvelope::execution(format!("output is not serializable: {e}")),
                    execution_time_ms,
                );
            }
        };

        let threshold = options
            .max_output_size
            .unwrap_or(self.inner.config.inline_threshold_bytes);
        if !options.return_ref && bytes.len() <= threshold {
            return TaskOutcome {
                payload: OutcomePayload::Inline(value),
                execution_time_ms,
            };
        }

        match self.inner.store.put(&bytes, OUTPUT_MIME).await {
            Ok(artifact) => {
                debug!(
                    "task {task_id}: output stored as {} ({} bytes)",
                    artifact.content_ref, artifact.size
                );
                TaskOutcome {
                    payload: OutcomePayload::Stored(artifact),
                    execution_time_ms,
                }
            }
            // Terminal immediately: a failing store is not a per-task
            // condition worth retrying against.
            Err(e) => TaskOutcome::failed(
                ErrorEnvelope::store_io(format!("failed to persist output: {e}")),
                execution_time_ms,
            ),
        }
    }

    /// Record the outcome, publish it and start as many queued tasks as
    /// freed capacity allows.
    fn finish_task(&self, task_id: u64, outcome: TaskOutcome) {
        let mut to_spawn = Vec::new();
        {
            let mut state = self.lock_state();
            let now = unix_now_ms();

            if let Some(task) = state.tasks.get_mut(&task_id) {
                task.completed_at_unix_ms = Some(now);
                match &outcome.payload {
                    OutcomePayload::Inline(value) => {
                        task.status = TaskStatus::Completed;
                        task.output = Some(value.clone());
                    }
                    OutcomePayload::Stored(artifact) => {
                        task.status = TaskStatus::Completed;
                        task.output_ref = Some(artifact.content_ref.clone());
                    }
                    OutcomePayload::Failed(error) => {
                        task.status = TaskStatus::Failed;
                        task.error = Some(error.clone());
                    }
                }
            }

            state.run_options.remove(&task_id);
            if let Some(tx) = state.outcomes.remove(&task_id) {
                // Joiners hold their own receivers; send after removal is
                // still observed through them.
                let _ = tx.send(Some(outcome));
            }
            state.running = state.running.saturating_sub(1);
            retain_finished(&mut state, task_id);

            while state.running < self.inner.config.concurrency_limit {
                let Some(next_id) = state.queue.pop() else {
                    break;
                };
                let Some(task) = state.tasks.get_mut(&next_id) else {
                    continue;
                };
                task.status = TaskStatus::Running;
                task.started_at_unix_ms = Some(unix_now_ms());
                state.running += 1;
                to_spawn.push(next_id);
            }
        }

        for next_id in to_spawn {
            let executor = self.clone();
            tokio::spawn(async move { executor.run_task(next_id).await });
        }
    }

    /// Persist partial progress for a live task. `intermediate` goes
    /// through the content store; the resulting ref lands on both the
    /// checkpoint and the task. Checkpoints are for the handler to apply
    /// on resume; retries do not consult them.
    pub async fn save_checkpoint(
        &self,
        task_id: u64,
        progress: f32,
        intermediate: Option<&Value>,
    ) -> Result<()> {
        if !self.lock_state().tasks.contains_key(&task_id) {
            return Err(ExecutorError::TaskNotFound(task_id));
        }

        let intermediate_ref = match intermediate {
            Some(value) => {
                let bytes = serde_json::to_vec(value)?;
                Some(self.inner.store.put(&bytes, OUTPUT_MIME).await?.content_ref)
            }
            None => None,
        };

        let mut state = self.lock_state();
        // The task may have been evicted while the store write awaited.
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Err(ExecutorError::TaskNotFound(task_id));
        };
        if let Some(ref content_ref) = intermediate_ref {
            task.checkpoint_ref = Some(content_ref.clone());
        }
        let checkpoint = TaskCheckpoint {
            task_id,
            status: task.status,
            progress: progress.clamp(0.0, 1.0),
            intermediate_ref,
            recorded_at_unix_ms: unix_now_ms(),
        };
        state.checkpoints.insert(task_id, checkpoint);
        Ok(())
    }

    /// Latest checkpoint for a task, or `None` if none was saved (or the
    /// task has been evicted).
    #[must_use]
    pub fn resume_from_checkpoint(&self, task_id: u64) -> Option<TaskCheckpoint> {
        self.lock_state().checkpoints.get(&task_id).cloned()
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        let state = self.lock_state();
        let mut stats = ExecutorStats::default();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Running => stats.active_count += 1,
                TaskStatus::Queued => stats.queued_count += 1,
                TaskStatus::Completed => stats.completed_count += 1,
                TaskStatus::Failed => stats.failed_count += 1,
                TaskStatus::Pending => {}
            }
        }
        stats
    }

    /// Snapshot of one tracked task.
    #[must_use]
    pub fn task(&self, task_id: u64) -> Option<Task> {
        self.lock_state().tasks.get(&task_id).cloned()
    }

    fn lock_state(&self) -> MutexGuard<'_, ExecutorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Resolve the dedup table for `hash`: completed tasks answer from cache,
/// live tasks absorb the caller as a joiner, failed tasks (or stale
/// entries) fall through to a fresh admission.
fn dedup_lookup(
    state: &mut ExecutorState,
    store: &ContentStore,
    hash: &str,
) -> Option<Admission> {
    let task_id = *state.dedup.get(hash)?;
    let task = state.tasks.get(&task_id)?;
    match task.status {
        TaskStatus::Completed => {
            let admission = if let Some(ref output_ref) = task.output_ref {
                store.get_meta(output_ref).map(Admission::CachedStored)
            } else {
                task.output.clone().map(Admission::CachedInline)
            };
            if admission.is_some() {
                // Keep served entries warm in the retention window.
                state.finished.get(&task_id);
            }
            admission
        }
        // Failures are never served from cache; the new task will take
        // over the dedup entry.
        TaskStatus::Failed => None,
        _ => state
            .outcomes
            .get(&task_id)
            .map(|tx| Admission::Join(tx.subscribe())),
    }
}

/// Track a finished task in the retention window, dropping whatever the
/// window evicts. Live tasks are never in the window, so never evicted.
fn retain_finished(state: &mut ExecutorState, task_id: u64) {
    if let Some((evicted_id, ())) = state.finished.push(task_id, ()) {
        if evicted_id == task_id {
            return;
        }
        state.checkpoints.remove(&evicted_id);
        state.outcomes.remove(&evicted_id);
        state.run_options.remove(&evicted_id);
        if let Some(evicted) = state.tasks.remove(&evicted_id) {
            if state.dedup.get(&evicted.content_hash) == Some(&evicted_id) {
                state.dedup.remove(&evicted.content_hash);
            }
            debug!(
                "evicted finished task {evicted_id} ({}) from the retention window",
                evicted.tool_name
            );
        }
    }
}

async fn await_outcome(mut rx: watch::Receiver<Option<TaskOutcome>>) -> TaskOutcome {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // Publisher dropped without an outcome; should not happen.
            return TaskOutcome::failed(
                ErrorEnvelope::execution("task abandoned without an outcome"),
                0,
            );
        }
    }
}

fn result_from_outcome(payload: OutcomePayload, meta: InvokeMeta) -> InvokeResult {
    match payload {
        OutcomePayload::Inline(data) => InvokeResult::inline(data, meta),
        OutcomePayload::Stored(artifact) => InvokeResult::stored(artifact, meta),
        OutcomePayload::Failed(error) => InvokeResult::failure(error, meta),
    }
}

fn meta(tool_name: &str, execution_time_ms: u64, cache_hit: bool, trace_id: &str) -> InvokeMeta {
    InvokeMeta {
        tool_name: tool_name.to_string(),
        execution_time_ms,
        cache_hit,
        trace_id: trace_id.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
