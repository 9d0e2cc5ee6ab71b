use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use gantry_core::{
    new_id, now_millis, now_rfc3339, rfc3339_add_millis, rfc3339_to_millis, ServiceError,
    ValidationErrors,
};
use gantry_entity::EntityStore;

use crate::model::{CreateOptions, Task, TaskQuery, TaskStatus, TaskView};
use crate::runtime::{CloneDataSource, WorkerRuntime};
use crate::store::TaskStore;
use crate::urn;

// ---------------------------------------------------------------------------
// ConnectorConfig
// ---------------------------------------------------------------------------

/// Tuning knobs for the connector, validated at construction.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Delay between successive dispatch passes for a type (ms).
    pub task_interval: u64,
    /// Fallback retry delay when a task carries none (ms).
    pub retry_interval: u64,
    /// Minimum time between retention sweeps (ms).
    pub cleanup_interval: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            task_interval: 100,
            retry_interval: 5_000,
            cleanup_interval: 120_000,
        }
    }
}

impl ConnectorConfig {
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = ValidationErrors::new();
        if self.task_interval < 1 {
            errors.push("taskInterval", "must be >= 1 ms");
        }
        if self.retry_interval < 1 {
            errors.push("retryInterval", "must be >= 1 ms");
        }
        if self.cleanup_interval < 5_000 {
            errors.push("cleanupInterval", "must be >= 5000 ms");
        }
        errors.into_result()
    }
}

// ---------------------------------------------------------------------------
// TaskConnector
// ---------------------------------------------------------------------------

/// Handler binding: the worker entry point for a task type.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    pub module: String,
    pub method: String,
}

#[derive(Default)]
struct TypeState {
    /// A dispatch pass (possibly mid-execution) is running for this type.
    active: bool,
    /// The pending wake timer, if any. Only the timer task is ever aborted;
    /// a running pass is never cancelled.
    wake: Option<AbortHandle>,
}

struct Inner {
    store: TaskStore,
    runtime: Arc<dyn WorkerRuntime>,
    clone_source: Option<Arc<dyn CloneDataSource>>,
    config: ConnectorConfig,
    handlers: RwLock<HashMap<String, HandlerBinding>>,
    states: Mutex<HashMap<String, TypeState>>,
    started: AtomicBool,
    last_sweep: Mutex<Option<Instant>>,
}

/// The durable background-task connector.
///
/// Tasks are persisted in the entity store, which stays the authority on
/// what runs next — the in-memory pieces here (handler registry, per-type
/// pass markers, wake timers) are rebuilt after every restart.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TaskConnector {
    inner: Arc<Inner>,
}

/// Recover a poisoned guard; the protected maps hold plain data that cannot
/// be left half-updated by the straight-line critical sections.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TaskConnector {
    pub fn new(
        store: Arc<dyn EntityStore>,
        runtime: Arc<dyn WorkerRuntime>,
        clone_source: Option<Arc<dyn CloneDataSource>>,
        config: ConnectorConfig,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store: TaskStore::new(store),
                runtime,
                clone_source,
                config,
                handlers: RwLock::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                last_sweep: Mutex::new(None),
            }),
        })
    }

    fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Handler registry
    // -----------------------------------------------------------------------

    /// Bind a task type to a worker `module.method`. Bindings are a runtime
    /// concern and must be re-established after every restart.
    pub fn register_handler(&self, task_type: &str, module: &str, method: &str) {
        let binding = HandlerBinding {
            module: module.to_string(),
            method: method.to_string(),
        };
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task_type.to_string(), binding);
        info!(r#type = task_type, "task handler registered");
        self.poke(task_type);
    }

    /// Remove a binding. In-flight work is not cancelled; future dispatches
    /// of the type are skipped until a handler returns.
    pub fn unregister_handler(&self, task_type: &str) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(task_type);
        info!(r#type = task_type, "task handler unregistered");
    }

    fn handler_for(&self, task_type: &str) -> Option<HandlerBinding> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(task_type)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------------

    /// Persist a new pending task and poke its type's dispatcher.
    /// Returns the task's URN once the record is durable.
    pub fn create(
        &self,
        task_type: &str,
        payload: Option<Value>,
        options: CreateOptions,
    ) -> Result<String, ServiceError> {
        options.validate()?;

        let now = now_rfc3339();
        let task = Task {
            id: new_id(),
            task_type: task_type.to_string(),
            status: TaskStatus::Pending,
            payload,
            result: None,
            error: None,
            date_created: now.clone(),
            date_modified: now.clone(),
            date_next_process: Some(now),
            date_completed: None,
            date_cancelled: None,
            retry_interval: options.retry_interval,
            retries_remaining: options.retry_count,
            retain_for: Some(options.retain_for.unwrap_or(0)),
            retain_until: None,
        };
        self.inner.store.put(&task)?;
        info!(task = %task.id, r#type = task_type, "task created");

        self.poke(task_type);
        Ok(urn::to_urn(&task.id))
    }

    /// Fetch a task by URN. `None` when the record does not exist.
    pub fn get(&self, task_urn: &str) -> Result<Option<TaskView>, ServiceError> {
        let id = urn::parse(task_urn)?;
        Ok(self.inner.store.get(id)?.map(Task::into_view))
    }

    /// Surface a pending task at the head of the next dispatch pass.
    /// No-op unless the task exists, is pending, and is scheduled.
    pub fn retry(&self, task_urn: &str) -> Result<(), ServiceError> {
        let id = urn::parse(task_urn)?;
        let Some(mut task) = self.inner.store.get(id)? else {
            return Ok(());
        };
        if task.status != TaskStatus::Pending || task.date_next_process.is_none() {
            return Ok(());
        }

        let now = now_rfc3339();
        task.date_next_process = Some(now.clone());
        task.date_modified = now;
        self.inner.store.put(&task)?;
        debug!(task = %task.id, "task resurfaced for retry");

        self.poke(&task.task_type);
        Ok(())
    }

    /// Cancel a pending task. Processing and terminal tasks are left alone.
    ///
    /// `dateModified` is deliberately not bumped: retention keeps counting
    /// from the last real modification.
    pub fn cancel(&self, task_urn: &str) -> Result<(), ServiceError> {
        let id = urn::parse(task_urn)?;
        let Some(mut task) = self.inner.store.get(id)? else {
            return Ok(());
        };
        if task.status != TaskStatus::Pending {
            return Ok(());
        }

        task.status = TaskStatus::Cancelled;
        task.date_cancelled = Some(now_rfc3339());
        task.date_next_process = None;

        if task.retain_for == Some(0) {
            self.inner.store.remove(&task.id)?;
            info!(task = %task.id, "task cancelled and removed");
            return Ok(());
        }
        if let Some(until) = retain_timestamp(&task) {
            task.retain_until = Some(until);
            task.retain_for = None;
        }
        self.inner.store.put(&task)?;
        info!(task = %task.id, "task cancelled");
        Ok(())
    }

    /// Delete a task record unconditionally.
    pub fn remove(&self, task_urn: &str) -> Result<(), ServiceError> {
        let id = urn::parse(task_urn)?;
        self.inner.store.remove(id)?;
        Ok(())
    }

    /// Query tasks. Defaults to every type and status, `dateCreated` descending.
    pub fn query(&self, query: &TaskQuery) -> Result<(Vec<TaskView>, Option<String>), ServiceError> {
        let (tasks, cursor) = self.inner.store.query(query)?;
        Ok((tasks.into_iter().map(Task::into_view).collect(), cursor))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Become eligible to dispatch: run a retention sweep and poke every
    /// registered type. Tasks found in `processing` from a previous run are
    /// re-selected by their type's first pass.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("background task connector started");
        self.sweep();

        let types: Vec<String> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        for task_type in types {
            self.poke(&task_type);
        }
    }

    /// Stop dispatching and cancel wake timers. In-flight worker calls run
    /// to completion and still record their outcome.
    pub fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut states = lock(&self.inner.states);
        for state in states.values_mut() {
            if let Some(timer) = state.wake.take() {
                timer.abort();
            }
        }
        info!("background task connector stopped");
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Request a dispatch pass for a type as soon as possible.
    fn poke(&self, task_type: &str) {
        if !self.is_started() {
            return;
        }
        let conn = self.clone();
        let task_type = task_type.to_string();
        tokio::spawn(async move {
            conn.process_tasks(&task_type).await;
        });
    }

    /// Arm the single wake timer for a type. Any previous timer is cancelled.
    /// The timer only pokes — the pass it triggers runs as its own task, so
    /// aborting a timer can never cancel in-flight work.
    fn arm_wake(&self, task_type: &str, delay_ms: u64) {
        if !self.is_started() {
            return;
        }
        let conn = self.clone();
        let poke_type = task_type.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            conn.poke(&poke_type);
        });

        let mut states = lock(&self.inner.states);
        let state = states.entry(task_type.to_string()).or_default();
        if let Some(previous) = state.wake.replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Mark the end of a dispatch pass for a type.
    fn finish_pass(&self, task_type: &str) {
        let mut states = lock(&self.inner.states);
        if let Some(state) = states.get_mut(task_type) {
            state.active = false;
        }
    }

    /// One dispatch pass: select the earliest due pending/processing task of
    /// the type, execute it if due, otherwise arm the wake timer.
    async fn process_tasks(&self, task_type: &str) {
        if !self.is_started() {
            return;
        }

        // Single-flight per type: claim the pass marker, drop any timer.
        {
            let mut states = lock(&self.inner.states);
            let state = states.entry(task_type.to_string()).or_default();
            if state.active {
                return;
            }
            state.active = true;
            if let Some(timer) = state.wake.take() {
                timer.abort();
            }
        }

        let next = match self.inner.store.next_due(task_type) {
            Ok(next) => next,
            Err(e) => {
                // Transient store trouble must not consume retries; just
                // re-arm and look again.
                error!(r#type = task_type, error = %e, "dispatch query failed");
                self.finish_pass(task_type);
                self.arm_wake(task_type, self.inner.config.task_interval);
                return;
            }
        };

        let Some(task) = next else {
            self.finish_pass(task_type);
            self.sweep();
            return;
        };

        let due = task
            .date_next_process
            .as_deref()
            .and_then(rfc3339_to_millis)
            .unwrap_or_else(now_millis);
        let delay = due - now_millis();

        if delay > 0 {
            self.finish_pass(task_type);
            self.arm_wake(task_type, delay as u64);
            return;
        }

        self.process_task(task).await;
        self.finish_pass(task_type);
        self.arm_wake(task_type, self.inner.config.task_interval);
    }

    /// Execute one task through the worker runtime and record the outcome.
    async fn process_task(&self, mut task: Task) {
        let Some(binding) = self.handler_for(&task.task_type) else {
            warn!(task = %task.id, r#type = %task.task_type, "no handler registered, task left as-is");
            return;
        };

        task.status = TaskStatus::Processing;
        task.date_modified = now_rfc3339();
        if let Err(e) = self.inner.store.put(&task) {
            error!(task = %task.id, error = %e, "failed to mark task processing");
            return;
        }
        debug!(task = %task.id, r#type = %task.task_type, "task dispatched");

        let clone_data = self
            .inner
            .clone_source
            .as_ref()
            .map(|source| source.clone_data())
            .unwrap_or(Value::Null);
        let args = match &task.payload {
            Some(payload) => vec![clone_data, payload.clone()],
            None => vec![clone_data],
        };

        let outcome = self
            .inner
            .runtime
            .exec(&binding.module, &binding.method, args)
            .await;

        let now = now_rfc3339();
        task.date_modified = now.clone();
        match outcome {
            Ok(result) => {
                task.status = TaskStatus::Success;
                task.result = Some(result);
                task.date_completed = Some(now);
                task.date_next_process = None;
                task.retries_remaining = None;
                task.retry_interval = None;
                task.error = None;
                info!(task = %task.id, "task succeeded");
            }
            Err(fault) => {
                let fault = fault.unwrap_worker_exception();
                warn!(task = %task.id, error = %fault, "task handler failed");
                task.error = Some(fault);

                match task.retries_remaining {
                    Some(0) => {
                        task.status = TaskStatus::Failed;
                        task.date_completed = Some(now);
                        task.date_next_process = None;
                    }
                    remaining => {
                        // A remaining budget decrements; an absent budget
                        // retries without limit.
                        if let Some(n) = remaining {
                            task.retries_remaining = Some(n - 1);
                        }
                        task.status = TaskStatus::Pending;
                        let interval =
                            task.retry_interval.unwrap_or(self.inner.config.retry_interval);
                        // Retry delays accumulate from the last modification,
                        // so retried work yields to fresh submissions.
                        task.date_next_process =
                            rfc3339_add_millis(&task.date_modified, interval as i64)
                                .or_else(|| Some(now_rfc3339()));
                    }
                }
            }
        }

        if task.status.is_terminal() && task.retain_for == Some(0) {
            if let Err(e) = self.inner.store.remove(&task.id) {
                error!(task = %task.id, error = %e, "failed to remove zero-retention task");
            }
            return;
        }
        if let Some(until) = retain_timestamp(&task) {
            task.retain_until = Some(until);
            task.retain_for = None;
        }
        if let Err(e) = self.inner.store.put(&task) {
            error!(task = %task.id, error = %e, "failed to record task outcome");
        }
    }

    // -----------------------------------------------------------------------
    // Retention sweep
    // -----------------------------------------------------------------------

    /// Throttled purge of terminal tasks past their retention timestamp.
    /// Store errors are swallowed; the next sweep retries.
    fn sweep(&self) {
        {
            let mut last = lock(&self.inner.last_sweep);
            let now = Instant::now();
            if let Some(previous) = *last {
                if now.duration_since(previous)
                    < Duration::from_millis(self.inner.config.cleanup_interval)
                {
                    return;
                }
            }
            *last = Some(now);
        }

        let now = now_millis();
        let mut removed = 0usize;
        loop {
            let batch = match self.inner.store.expired_batch(now) {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(error = %e, "retention sweep query failed");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            let mut progressed = false;
            for task in &batch {
                match self.inner.store.remove(&task.id) {
                    Ok(true) => {
                        removed += 1;
                        progressed = true;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(task = %task.id, error = %e, "retention remove failed");
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        if removed > 0 {
            info!(count = removed, "expired tasks removed");
        }
    }
}

/// Derive the retention timestamp for a task entering a terminal state.
///
/// `retainFor > 0` counts from `dateModified`; `-1` never expires; `0` or
/// absent yields nothing (a zero window deletes the record instead).
fn retain_timestamp(task: &Task) -> Option<i64> {
    if !task.status.is_terminal() {
        return None;
    }
    match task.retain_for {
        Some(window) if window > 0 => {
            Some(rfc3339_to_millis(&task.date_modified).unwrap_or_else(now_millis) + window)
        }
        Some(-1) => Some(-1),
        _ => None,
    }
}
