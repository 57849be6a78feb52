//! # Task Scheduler
//!
//! One-shot, wall-clock task execution shared by every component.
//!
//! ## Task Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scheduled Task Lifecycle                         │
//! │                                                                         │
//! │  schedule_at()            tick (every 1s)             tokio::spawn      │
//! │  ─────────────            ───────────────             ────────────      │
//! │  ┌──────────┐  time <= now  ┌──────────┐  removed  ┌──────────────┐    │
//! │  │ Pending  │──────────────►│  Fired   │──────────►│ action(payload)│   │
//! │  └────┬─────┘               └──────────┘           └──────┬───────┘    │
//! │       │                                                   │            │
//! │       │ cancel_by_name() / cancel()                Err / panic         │
//! │       ▼                                                   ▼            │
//! │  ┌──────────┐                                      logged, isolated    │
//! │  │ Removed  │                                                          │
//! │  └──────────┘                                                          │
//! │                                                                         │
//! │  NAMES                                                                 │
//! │  • schedule_at() appends: two tasks may share a name and both fire     │
//! │  • schedule_replacing() cancels every task with the name first         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::TaskError;

// =============================================================================
// Constants
// =============================================================================

/// Default interval between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Scheduled Task
// =============================================================================

/// Future returned by a scheduled action.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

/// Action executed when a task fires; receives the task payload.
pub type TaskAction = Box<dyn FnOnce(Value) -> TaskFuture + Send>;

/// A pending one-shot task.
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: Option<String>,
    pub execution_time: DateTime<Utc>,
    pub payload: Value,
    action: TaskAction,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("execution_time", &self.execution_time)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// How a fired action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked,
}

/// A task that was removed from the timeline and spawned.
#[derive(Debug)]
pub struct FiredTask {
    pub id: Uuid,
    pub name: Option<String>,
    outcome: JoinHandle<TaskOutcome>,
}

impl FiredTask {
    /// Waits for the action to finish.
    pub async fn outcome(self) -> TaskOutcome {
        self.outcome.await.unwrap_or(TaskOutcome::Panicked)
    }
}

// =============================================================================
// Task Scheduler
// =============================================================================

/// Pending-task timeline with name-scoped cancellation.
///
/// Shared as `Arc<TaskScheduler>`; all operations take `&self`.
pub struct TaskScheduler {
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<ScheduledTask>>,
    tick_interval: Duration,
}

impl TaskScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_tick_interval(clock, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_tick_interval(clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        TaskScheduler {
            clock,
            tasks: Mutex::new(Vec::new()),
            tick_interval,
        }
    }

    /// Current time according to the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Schedules `action` to run once at `time`.
    ///
    /// Never deduplicates: a second task under the same name is simply added.
    /// A time in the past fires on the next tick.
    pub fn schedule_at<F, Fut>(
        &self,
        action: F,
        time: DateTime<Utc>,
        name: Option<&str>,
        payload: Value,
    ) -> Uuid
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let task = ScheduledTask {
            id,
            name: name.map(str::to_string),
            execution_time: time,
            payload,
            action: Box::new(move |payload| action(payload).boxed()),
        };
        debug!(%id, name = ?task.name, at = %time, "Task scheduled");
        self.lock().push(task);
        id
    }

    /// Cancels every pending task named `name`, then schedules.
    pub fn schedule_replacing<F, Fut>(
        &self,
        action: F,
        time: DateTime<Utc>,
        name: &str,
        payload: Value,
    ) -> Uuid
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.cancel_by_name(name);
        self.schedule_at(action, time, Some(name), payload)
    }

    /// Convenience for `schedule_replacing(now + delay)`.
    pub fn schedule_in<F, Fut>(&self, action: F, delay: Duration, name: &str, payload: Value) -> Uuid
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));
        self.schedule_replacing(action, self.now() + delay, name, payload)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Removes every pending task named `name`. Returns how many were removed.
    pub fn cancel_by_name(&self, name: &str) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|t| t.name.as_deref() != Some(name));
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(name, removed, "Tasks cancelled");
        }
        removed
    }

    /// Removes a single task by id.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        before != tasks.len()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Names of pending tasks, in scheduling order (duplicates kept).
    pub fn pending_names(&self) -> Vec<String> {
        self.lock().iter().filter_map(|t| t.name.clone()).collect()
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.lock().iter().any(|t| t.name.as_deref() == Some(name))
    }

    /// Execution time of the earliest pending task named `name`.
    pub fn execution_time_of(&self, name: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .iter()
            .filter(|t| t.name.as_deref() == Some(name))
            .map(|t| t.execution_time)
            .min()
    }

    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        self.lock().iter().map(|t| t.execution_time).min()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // =========================================================================
    // Firing
    // =========================================================================

    /// Removes every task due at the current time and spawns its action.
    ///
    /// Each action runs in its own Tokio task; its error or panic is logged
    /// and reported through [`FiredTask::outcome`].
    pub fn fire_due(&self) -> Vec<FiredTask> {
        let now = self.now();
        let due: Vec<ScheduledTask> = {
            let mut tasks = self.lock();
            let (due, pending): (Vec<_>, Vec<_>) =
                tasks.drain(..).partition(|t| t.execution_time <= now);
            *tasks = pending;
            due
        };

        due.into_iter().map(Self::spawn_task).collect()
    }

    fn spawn_task(task: ScheduledTask) -> FiredTask {
        let ScheduledTask {
            id,
            name,
            payload,
            action,
            ..
        } = task;
        let label = name.clone().unwrap_or_else(|| "anonymous".to_string());

        let run = tokio::spawn(action(payload));
        let outcome = tokio::spawn(async move {
            match run.await {
                Ok(Ok(())) => {
                    debug!(%id, task = %label, "Task completed");
                    TaskOutcome::Completed
                }
                Ok(Err(e)) => {
                    warn!(%id, task = %label, error = %e, "Task failed");
                    TaskOutcome::Failed(e.to_string())
                }
                Err(join_error) => {
                    error!(%id, task = %label, error = %join_error, "Task panicked");
                    TaskOutcome::Panicked
                }
            }
        });

        FiredTask { id, name, outcome }
    }

    /// Tick loop. Spawn as a background task.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "Task scheduler starting");

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let fired = self.fire_due();
                    if !fired.is_empty() {
                        debug!(count = fired.len(), "Fired due tasks");
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Task scheduler shutting down");
                    break;
                }
            }
        }

        info!(pending = self.len(), "Task scheduler stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
