use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_models::{AgentMetrics, AgentState, AgentStatus, AgentTask, TaskPriority, TaskStatus};
use vigil_store::{AuditSink, NullAudit};

use crate::error::AgentError;
use crate::handler::TaskHandler;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Queued {
    task: AgentTask,
    sequence: u64,
    reply: oneshot::Sender<AgentTask>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.sequence == other.sequence
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first, then earlier submission first
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct TaskQueue {
    heap: BinaryHeap<Queued>,
    next_sequence: u64,
}

impl TaskQueue {
    fn push(&mut self, task: AgentTask, reply: oneshot::Sender<AgentTask>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Queued {
            task,
            sequence,
            reply,
        });
    }

    fn pop(&mut self) -> Option<Queued> {
        self.heap.pop()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn drain(&mut self) -> Vec<Queued> {
        let mut drained = Vec::with_capacity(self.heap.len());
        while let Some(queued) = self.heap.pop() {
            drained.push(queued);
        }
        drained
    }
}

struct Shared {
    name: String,
    handler: Arc<dyn TaskHandler>,
    audit: Arc<dyn AuditSink>,
    state: Mutex<AgentState>,
    queue: Mutex<TaskQueue>,
    metrics: Mutex<AgentMetrics>,
    notify: Notify,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    max_queue_depth: usize,
}

impl Shared {
    fn state(&self) -> AgentState {
        *lock(&self.state)
    }

    fn set_state(&self, next: AgentState) -> AgentState {
        let mut state = lock(&self.state);
        std::mem::replace(&mut *state, next)
    }

    fn event(&self, kind: &str, payload: serde_json::Value) {
        if let Err(e) = self.audit.record_event(&self.name, kind, &payload) {
            warn!(agent = %self.name, kind, error = %e, "Failed to record agent event");
        }
    }

    /// Record a terminal task and hand it back to whoever is waiting on it.
    fn finish(&self, task: AgentTask, reply: oneshot::Sender<AgentTask>) {
        {
            let mut metrics = lock(&self.metrics);
            metrics.record(&task);
        }
        if let Err(e) = self.audit.record_task(&self.name, &task) {
            warn!(agent = %self.name, task_id = %task.id, error = %e, "Failed to record task");
        }
        // The caller may have dropped its handle
        let _ = reply.send(task);
    }

    /// Fail every queued task with `reason`.
    fn drain_queue(&self, reason: &str) -> usize {
        let drained = lock(&self.queue).drain();
        let count = drained.len();
        for Queued {
            mut task, reply, ..
        } in drained
        {
            task.status = TaskStatus::Failed;
            task.error = Some(reason.to_string());
            task.completed_at = Some(Utc::now());
            self.finish(task, reply);
        }
        if count > 0 {
            info!(agent = %self.name, count, reason, "Drained queued tasks");
        }
        count
    }

    fn flush_metrics(&self) {
        let metrics = lock(&self.metrics).clone();
        if let Err(e) = self.audit.record_metrics(&self.name, &metrics) {
            warn!(agent = %self.name, error = %e, "Failed to record metrics");
        }
    }
}

/// Handle to a submitted task. Resolves once the task reaches a terminal
/// status.
pub struct TaskHandle {
    task_id: Uuid,
    rx: oneshot::Receiver<AgentTask>,
}

impl TaskHandle {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub async fn wait(self) -> Result<AgentTask, AgentError> {
        self.rx.await.map_err(|_| AgentError::ResultDropped)
    }
}

/// Drives one [`TaskHandler`] through the agent lifecycle.
///
/// Tasks are processed one at a time in priority order (FIFO within a
/// priority). A handler that errors, panics, or misses its deadline fails
/// only its own task; the runtime keeps going. The exception is
/// [`AgentError::Unrecoverable`], which moves the agent to `Error`.
pub struct AgentRuntime {
    shared: Arc<Shared>,
    cancel: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AgentRuntime {
    pub fn new(handler: Arc<dyn TaskHandler>, max_queue_depth: usize) -> Self {
        Self::with_audit(handler, max_queue_depth, Arc::new(NullAudit))
    }

    pub fn with_audit(
        handler: Arc<dyn TaskHandler>,
        max_queue_depth: usize,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: handler.name().to_string(),
                handler,
                audit,
                state: Mutex::new(AgentState::Idle),
                queue: Mutex::new(TaskQueue::default()),
                metrics: Mutex::new(AgentMetrics::default()),
                notify: Notify::new(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                max_queue_depth: max_queue_depth.max(1),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> AgentState {
        self.shared.state()
    }

    /// Start processing. Valid from `Idle`, `Stopped` and `Error`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), AgentError> {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                AgentState::Idle | AgentState::Stopped | AgentState::Error => {
                    *state = AgentState::Running;
                }
                from => {
                    return Err(AgentError::InvalidTransition {
                        from,
                        action: "start",
                    })
                }
            }
        }

        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();

        let shared = Arc::clone(&self.shared);
        let previous = lock(&self.worker).replace(tokio::spawn(run_loop(shared, token)));
        if let Some(previous) = previous {
            // A loop left over from an Error exit has already returned
            previous.abort();
        }

        info!(agent = %self.shared.name, "Agent started");
        self.shared.event("started", serde_json::Value::Null);
        Ok(())
    }

    /// Stop processing. Queued tasks fail with `runtime stopped`; an
    /// in-flight handler is aborted.
    pub async fn stop(&self) -> Result<(), AgentError> {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                AgentState::Running | AgentState::Paused | AgentState::Error => {
                    *state = AgentState::Stopped;
                }
                from => {
                    return Err(AgentError::InvalidTransition {
                        from,
                        action: "stop",
                    })
                }
            }
        }

        lock(&self.cancel).cancel();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(agent = %self.shared.name, error = %e, "Agent loop ended abnormally");
            }
        }

        self.shared.drain_queue("runtime stopped");
        self.shared.flush_metrics();
        info!(agent = %self.shared.name, "Agent stopped");
        self.shared.event("stopped", serde_json::Value::Null);
        Ok(())
    }

    /// Stop dequeuing. Queued tasks wait for `resume`; new submissions are
    /// rejected meanwhile.
    pub fn pause(&self) -> Result<(), AgentError> {
        self.transition(AgentState::Running, AgentState::Paused, "pause")?;
        info!(agent = %self.shared.name, "Agent paused");
        self.shared.event("paused", serde_json::Value::Null);
        Ok(())
    }

    pub fn resume(&self) -> Result<(), AgentError> {
        self.transition(AgentState::Paused, AgentState::Running, "resume")?;
        self.shared.notify.notify_one();
        info!(agent = %self.shared.name, "Agent resumed");
        self.shared.event("resumed", serde_json::Value::Null);
        Ok(())
    }

    fn transition(
        &self,
        expected: AgentState,
        next: AgentState,
        action: &'static str,
    ) -> Result<(), AgentError> {
        let mut state = lock(&self.shared.state);
        if *state != expected {
            return Err(AgentError::InvalidTransition {
                from: *state,
                action,
            });
        }
        *state = next;
        Ok(())
    }

    /// Enqueue a task and return immediately. Only a running agent accepts
    /// work.
    pub fn submit(&self, mut task: AgentTask) -> Result<TaskHandle, AgentError> {
        let (tx, rx) = oneshot::channel();
        let task_id = task.id;
        task.status = TaskStatus::Pending;
        {
            // Held across the push so stop and the error path, which change
            // state before draining, never miss a task. Order: state, queue.
            let state = lock(&self.shared.state);
            if !state.accepts_tasks() {
                return Err(AgentError::NotAccepting(*state));
            }
            let mut queue = lock(&self.shared.queue);
            if queue.len() >= self.shared.max_queue_depth {
                return Err(AgentError::QueueFull(queue.len()));
            }
            debug!(
                agent = %self.shared.name,
                task_id = %task_id,
                task_type = %task.task_type,
                priority = ?task.priority,
                "Task queued"
            );
            queue.push(task, tx);
        }
        lock(&self.shared.metrics).tasks_submitted += 1;
        self.shared.notify.notify_one();

        Ok(TaskHandle { task_id, rx })
    }

    /// Submit and wait for the terminal task.
    pub async fn execute(&self, task: AgentTask) -> Result<AgentTask, AgentError> {
        self.submit(task)?.wait().await
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            agent: self.shared.name.clone(),
            state: self.shared.state(),
            metrics: lock(&self.shared.metrics).clone(),
            queue_depth: lock(&self.shared.queue).len(),
        }
    }

    pub fn metrics(&self) -> AgentMetrics {
        lock(&self.shared.metrics).clone()
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of tasks ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.peak_in_flight.load(Ordering::Acquire)
    }

    /// Build and submit a task with the runtime's default timeout rules.
    pub fn submit_with(
        &self,
        task_type: &str,
        parameters: serde_json::Value,
        priority: TaskPriority,
    ) -> Result<TaskHandle, AgentError> {
        self.submit(AgentTask::new(task_type, parameters).with_priority(priority))
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        lock(&self.cancel).cancel();
    }
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!(agent = %shared.name, "Agent loop started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = if shared.state() == AgentState::Running {
            lock(&shared.queue).pop()
        } else {
            None
        };

        match next {
            Some(queued) => {
                if let Some(reason) = process(&shared, queued, &cancel).await {
                    enter_error(&shared, &reason);
                    break;
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shared.notify.notified() => {}
                }
            }
        }
    }
    debug!(agent = %shared.name, "Agent loop exited");
}

fn enter_error(shared: &Shared, reason: &str) {
    let previous = shared.set_state(AgentState::Error);
    error!(agent = %shared.name, from = %previous, reason, "Agent entered error state");
    shared.drain_queue("agent entered error state");
    shared.flush_metrics();
    shared.event("error", serde_json::json!({ "reason": reason }));
}

/// Run one task to a terminal status. Returns the reason when the handler
/// reported an unrecoverable failure.
async fn process(shared: &Shared, queued: Queued, cancel: &CancellationToken) -> Option<String> {
    let Queued { mut task, reply, .. } = queued;
    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());

    let now = shared.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
    shared.peak_in_flight.fetch_max(now, Ordering::AcqRel);

    let handler = Arc::clone(&shared.handler);
    let input = task.clone();
    let mut join = tokio::spawn(async move { handler.handle(&input).await });

    let deadline = task.timeout();
    let outcome = tokio::select! {
        res = tokio::time::timeout(deadline, &mut join) => Some(res),
        _ = cancel.cancelled() => None,
    };

    let mut fatal = None;
    match outcome {
        Some(Ok(Ok(Ok(value)))) => {
            task.status = TaskStatus::Completed;
            task.result = Some(value);
        }
        Some(Ok(Ok(Err(AgentError::Unrecoverable(reason))))) => {
            task.status = TaskStatus::Failed;
            task.error = Some(format!("unrecoverable: {reason}"));
            fatal = Some(reason);
        }
        Some(Ok(Ok(Err(e)))) => {
            warn!(agent = %shared.name, task_id = %task.id, error = %e, "Task failed");
            task.status = TaskStatus::Failed;
            task.error = Some(e.to_string());
        }
        Some(Ok(Err(join_error))) => {
            let message = if join_error.is_panic() {
                "handler panicked"
            } else {
                "handler cancelled"
            };
            error!(agent = %shared.name, task_id = %task.id, "{message}");
            task.status = TaskStatus::Failed;
            task.error = Some(message.to_string());
        }
        Some(Err(_elapsed)) => {
            join.abort();
            warn!(
                agent = %shared.name,
                task_id = %task.id,
                timeout_ms = task.timeout_ms,
                "Task timed out"
            );
            task.status = TaskStatus::TimedOut;
            task.error = Some("timeout".to_string());
            task.result = shared.handler.on_timeout(&task);
        }
        None => {
            join.abort();
            task.status = TaskStatus::Failed;
            task.error = Some("runtime stopped".to_string());
        }
    }

    task.completed_at = Some(Utc::now());
    debug!(
        agent = %shared.name,
        task_id = %task.id,
        status = ?task.status,
        duration_ms = task.duration_ms().unwrap_or(0),
        "Task finished"
    );
    shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    shared.finish(task, reply);
    fatal
}
