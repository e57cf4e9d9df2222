//! Named periodic task runner.
//!
//! Every tick the scheduler launches each enabled task whose next run is due
//! and which is not already running. A run's completion (success, failure, or
//! timeout) sets the next run to `completion + interval`, so a slow run pushes
//! the schedule back instead of bunching runs together.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Boxed future returned by a task action.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A task body; called once per run.
pub type TaskAction = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No task registered under this name.
    #[error("unknown task '{0}'\n  Suggestion: Check the task name; names are case-sensitive")]
    UnknownTask(String),

    /// The task is executing right now.
    #[error("task '{0}' is already running")]
    AlreadyRunning(String),

    /// A task with this name already exists.
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),
}

/// How one run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The action returned `Ok`.
    Succeeded,
    /// The action returned an error or panicked.
    Failed(String),
    /// The action exceeded the per-run timeout and was dropped.
    TimedOut,
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    /// Unique task name.
    pub name: String,
    /// Spacing between the end of one run and the start of the next.
    pub interval: Duration,
    /// Disabled tasks are never launched by the tick.
    pub enabled: bool,
    /// Whether a run is in flight.
    pub running: bool,
    /// Wall-clock time the last run finished.
    pub last_run: Option<DateTime<Utc>>,
    /// When the tick will next launch the task.
    pub next_run: Instant,
    /// Result of the last run.
    pub last_outcome: Option<TaskOutcome>,
}

struct TaskEntry {
    interval: Duration,
    action: TaskAction,
    enabled: bool,
    running: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: Instant,
    last_outcome: Option<TaskOutcome>,
}

type TaskTable = Arc<Mutex<BTreeMap<String, TaskEntry>>>;

fn lock(tasks: &TaskTable) -> MutexGuard<'_, BTreeMap<String, TaskEntry>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodic task runner with single-flight execution per task.
pub struct Scheduler {
    tasks: TaskTable,
    tick: Duration,
    task_timeout: Duration,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = lock(&self.tasks).keys().cloned().collect();
        f.debug_struct("Scheduler")
            .field("tick", &self.tick)
            .field("task_timeout", &self.task_timeout)
            .field("tasks", &names)
            .finish()
    }
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new(tick: Duration, task_timeout: Duration) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
            tick: tick.max(Duration::from_millis(1)),
            task_timeout,
        }
    }

    /// Registers a task; its first run is due immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DuplicateTask`] if `name` is taken.
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        action: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let action: TaskAction = Arc::new(move || action().boxed());

        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        debug!(task = %name, interval_secs = interval.as_secs(), "Task registered");
        tasks.insert(
            name,
            TaskEntry {
                interval,
                action,
                enabled: true,
                running: false,
                last_run: None,
                next_run: Instant::now(),
                last_outcome: None,
            },
        );
        Ok(())
    }

    /// Enables or disables a task without touching its schedule.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownTask`] for an unregistered name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut tasks = lock(&self.tasks);
        let entry = tasks
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
        entry.enabled = enabled;
        info!(task = name, enabled, "Task enablement changed");
        Ok(())
    }

    /// Snapshot of every task, ordered by name.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskStatus> {
        lock(&self.tasks)
            .iter()
            .map(|(name, entry)| TaskStatus {
                name: name.clone(),
                interval: entry.interval,
                enabled: entry.enabled,
                running: entry.running,
                last_run: entry.last_run,
                next_run: entry.next_run,
                last_outcome: entry.last_outcome.clone(),
            })
            .collect()
    }

    /// Launches every due task; returns the names launched.
    pub fn tick(&self) -> Vec<String> {
        let now = Instant::now();
        let mut launched = Vec::new();
        let mut tasks = lock(&self.tasks);
        for (name, entry) in tasks.iter_mut() {
            if !entry.enabled || entry.running || entry.next_run > now {
                continue;
            }
            entry.running = true;
            launched.push(name.clone());
            drop(self.launch(name.clone(), Arc::clone(&entry.action), true));
        }
        launched
    }

    /// Runs a task immediately and waits for it.
    ///
    /// The periodic schedule is left alone: `last_run` is updated, `next_run`
    /// is not.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownTask`] or [`SchedulerError::AlreadyRunning`].
    #[instrument(skip(self))]
    pub async fn run_now(&self, name: &str) -> Result<TaskOutcome, SchedulerError> {
        let handle = {
            let mut tasks = lock(&self.tasks);
            let entry = tasks
                .get_mut(name)
                .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
            if entry.running {
                return Err(SchedulerError::AlreadyRunning(name.to_string()));
            }
            entry.running = true;
            self.launch(name.to_string(), Arc::clone(&entry.action), false)
        };
        Ok(handle
            .await
            .unwrap_or_else(|e| TaskOutcome::Failed(format!("task join failed: {e}"))))
    }

    /// Ticks until `cancel` fires. In-flight runs are left to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            tick_secs = self.tick.as_secs(),
            tasks = lock(&self.tasks).len(),
            "Scheduler started"
        );
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    let launched = self.tick();
                    if !launched.is_empty() {
                        debug!(?launched, "Launched due tasks");
                    }
                }
            }
        }
    }

    fn launch(
        &self,
        name: String,
        action: TaskAction,
        reschedule: bool,
    ) -> JoinHandle<TaskOutcome> {
        let tasks = Arc::clone(&self.tasks);
        let timeout = self.task_timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            // The action may panic before it hands back a future.
            let outcome = match catch_unwind(AssertUnwindSafe(|| action())) {
                Ok(future) => {
                    let run = AssertUnwindSafe(future).catch_unwind();
                    match tokio::time::timeout(timeout, run).await {
                        Ok(Ok(Ok(()))) => TaskOutcome::Succeeded,
                        Ok(Ok(Err(error))) => TaskOutcome::Failed(format!("{error:#}")),
                        Ok(Err(_)) => TaskOutcome::Failed("task panicked".to_string()),
                        Err(_) => TaskOutcome::TimedOut,
                    }
                }
                Err(_) => TaskOutcome::Failed("task panicked".to_string()),
            };

            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &outcome {
                TaskOutcome::Succeeded => info!(task = %name, elapsed_ms, "Task finished"),
                TaskOutcome::Failed(error) => {
                    warn!(task = %name, elapsed_ms, error = %error, "Task failed");
                }
                TaskOutcome::TimedOut => {
                    warn!(task = %name, timeout_secs = timeout.as_secs(), "Task timed out");
                }
            }

            let mut tasks = lock(&tasks);
            if let Some(entry) = tasks.get_mut(&name) {
                entry.running = false;
                entry.last_run = Some(Utc::now());
                entry.last_outcome = Some(outcome.clone());
                if reschedule {
                    entry.next_run = Instant::now() + entry.interval;
                }
            }
            outcome
        })
    }
}
