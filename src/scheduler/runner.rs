//! Per-task runner: sleeps until the next fire time, respects the master
//! lock, executes the user callback and persists run history.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

use super::context::RunContext;
use super::lock::MasterSignal;
use super::registry::RegistryError;
use super::ScheduledWork;
use crate::core::config::ScheduledTaskConfig;
use crate::core::schedule::{CronSchedule, ScheduleError};
use crate::core::types::TaskName;
use crate::repository::{Repository, RepositoryError, ScheduleState};

/// Longest stretch a master runner sleeps before re-reading its schedule
/// row. Bounds how stale a runtime schedule change can go unnoticed.
pub(crate) const MAX_MASTER_SLEEP: Duration = Duration::from_secs(2 * 60);

/// How long a non-master runner sleeps between checks. Lock acquisition
/// wakes these sleepers early.
pub(crate) const NON_MASTER_SLEEP: Duration = Duration::from_secs(15 * 60);

/// Pause after an error inside the run loop before trying again.
pub(crate) const ERROR_BACKOFF: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How long a master runner should wait before re-evaluating.
///
/// `None` means the fire time has passed and the task is due now. A task
/// with no upcoming fire time waits the full clamp; only `run_once` can
/// trigger it.
fn master_wait(now: DateTime<Utc>, next_run: Option<DateTime<Utc>>) -> Option<Duration> {
    match next_run {
        Some(next) if now < next => {
            let until = (next - now).to_std().unwrap_or(MAX_MASTER_SLEEP);
            Some(until.min(MAX_MASTER_SLEEP))
        }
        Some(_) => None,
        None => Some(MAX_MASTER_SLEEP),
    }
}

/// Errors that abort one cycle of the run loop. The loop logs them, backs
/// off for [`ERROR_BACKOFF`] and continues; they never escape upward.
#[derive(Debug, Error)]
pub(crate) enum CycleError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The schedule row disappeared underneath the runner.
    #[error("schedule row for task '{0}' is missing")]
    MissingSchedule(TaskName),
}

impl From<CycleError> for RegistryError {
    fn from(error: CycleError) -> Self {
        match error {
            CycleError::Repository(e) => RegistryError::Repository(e),
            CycleError::Schedule(e) => RegistryError::Schedule(e),
            CycleError::MissingSchedule(name) => RegistryError::Repository(
                RepositoryError::NotFound(format!("schedule: {}", name)),
            ),
        }
    }
}

/// Mutable state shared between the run loop and the public task handle.
struct RunnerShared {
    notify: Arc<Notify>,
    run_flag: AtomicBool,
    running: AtomicBool,
    active: AtomicBool,
    override_schedule: Mutex<Option<CronSchedule>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    current_run_started: Mutex<Option<DateTime<Utc>>>,
    last_run_completed: Mutex<Option<DateTime<Utc>>>,
}

impl RunnerShared {
    fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            run_flag: AtomicBool::new(true),
            running: AtomicBool::new(false),
            active: AtomicBool::new(true),
            override_schedule: Mutex::new(None),
            next_run: Mutex::new(None),
            current_run_started: Mutex::new(None),
            last_run_completed: Mutex::new(None),
        }
    }

    fn is_alive(&self) -> bool {
        self.run_flag.load(Ordering::SeqCst)
    }
}

/// State machine for one registered task.
///
/// Owned behind an `Arc` by both the spawned run loop and the public
/// [`ScheduledTask`](super::handle::ScheduledTask) handle.
pub(crate) struct TaskRunner {
    config: ScheduledTaskConfig,
    default_schedule: CronSchedule,
    repository: Arc<dyn Repository>,
    master: MasterSignal,
    work: Arc<dyn ScheduledWork>,
    hostname: String,
    test_mode: bool,
    shared: RunnerShared,
}

impl TaskRunner {
    pub(crate) fn new(
        config: ScheduledTaskConfig,
        default_schedule: CronSchedule,
        repository: Arc<dyn Repository>,
        master: MasterSignal,
        work: Arc<dyn ScheduledWork>,
        hostname: String,
        test_mode: bool,
    ) -> Self {
        Self {
            config,
            default_schedule,
            repository,
            master,
            work,
            hostname,
            test_mode,
            shared: RunnerShared::new(),
        }
    }

    pub(crate) fn name(&self) -> &TaskName {
        self.config.name()
    }

    pub(crate) fn config(&self) -> &ScheduledTaskConfig {
        &self.config
    }

    pub(crate) fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub(crate) fn notify_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shared.notify)
    }

    pub(crate) fn default_cron_expression(&self) -> &str {
        self.default_schedule.expression()
    }

    /// The override expression if one is set, otherwise the default.
    pub(crate) fn active_cron_expression(&self) -> String {
        lock(&self.shared.override_schedule)
            .as_ref()
            .map(|schedule| schedule.expression().to_string())
            .unwrap_or_else(|| self.default_schedule.expression().to_string())
    }

    fn override_expression(&self) -> Option<String> {
        lock(&self.shared.override_schedule)
            .as_ref()
            .map(|schedule| schedule.expression().to_string())
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub(crate) fn next_run(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.next_run)
    }

    pub(crate) fn last_run_started(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.current_run_started)
    }

    pub(crate) fn last_run_completed(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.last_run_completed)
    }

    /// Minutes the current run has been executing, while one is executing.
    pub(crate) fn run_time_in_minutes(&self) -> Option<i64> {
        if !self.is_running() {
            return None;
        }
        let started = (*lock(&self.shared.current_run_started))?;
        Some((Utc::now() - started).num_minutes())
    }

    /// Whether the current run has exceeded its expected duration.
    ///
    /// Purely diagnostic; the run is never interrupted.
    pub(crate) fn is_overdue(&self) -> bool {
        let expected = self.config.max_expected_minutes_to_run();
        if expected == 0 {
            return false;
        }
        self.run_time_in_minutes()
            .is_some_and(|minutes| minutes >= i64::from(expected))
    }

    /// Next fire time of the active cron expression after `now`.
    fn next_scheduled_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let guard = lock(&self.shared.override_schedule);
        let schedule = guard.as_ref().unwrap_or(&self.default_schedule);
        schedule.next_after(now).ok()
    }

    /// Wake the run loop out of its current sleep.
    pub(crate) fn wake(&self) {
        self.shared.notify.notify_one();
    }

    /// Ask the run loop to exit. The current callback, if any, finishes.
    pub(crate) fn kill(&self) {
        self.shared.run_flag.store(false, Ordering::SeqCst);
        self.wake();
    }

    /// Pause or resume the task, persisting the flag.
    pub(crate) async fn set_active(&self, active: bool) -> Result<(), RegistryError> {
        self.repository.set_active(self.name(), active).await?;
        self.shared.active.store(active, Ordering::SeqCst);
        tracing::info!(task = %self.name(), active, "task activation changed");
        Ok(())
    }

    /// Trigger an immediate run.
    ///
    /// In test mode the callback executes synchronously on the caller's
    /// task. Otherwise the one-shot flag is persisted and the runner is
    /// woken; the master node picks it up on its next evaluation.
    pub(crate) async fn run_now(&self) -> Result<(), RegistryError> {
        if self.test_mode {
            tracing::info!(task = %self.name(), "executing task synchronously in test mode");
            self.execute_once(false).await?;
            return Ok(());
        }

        self.repository.set_run_once(self.name(), true).await?;
        self.wake();
        Ok(())
    }

    /// Set or clear the override cron expression.
    ///
    /// `None` or an empty string reverts to the default expression. The
    /// next fire time is recomputed, persisted, and the runner is woken
    /// since the new expression may fire earlier than the current sleep.
    pub(crate) async fn set_override_expression(
        &self,
        expression: Option<&str>,
    ) -> Result<(), RegistryError> {
        let parsed = match expression {
            None | Some("") => None,
            Some(expr) => Some(CronSchedule::new(expr)?),
        };

        let next = parsed
            .as_ref()
            .unwrap_or(&self.default_schedule)
            .next_after(Utc::now())
            .ok();
        let stored = parsed.as_ref().map(|schedule| schedule.expression().to_string());

        *lock(&self.shared.override_schedule) = parsed;
        self.repository
            .update_next_run(self.name(), stored.as_deref(), next)
            .await?;
        *lock(&self.shared.next_run) = next;

        tracing::info!(
            task = %self.name(),
            cron = %self.active_cron_expression(),
            next = ?next,
            "cron expression changed"
        );
        self.wake();
        Ok(())
    }

    /// Long-running loop driving the task. Exits only via [`kill`](Self::kill).
    pub(crate) async fn run_loop(self: Arc<Self>) {
        tracing::info!(
            task = %self.name(),
            cron = %self.config.cron_expression(),
            "task runner started"
        );

        while self.shared.is_alive() {
            if let Err(error) = self.cycle().await {
                if !self.shared.is_alive() {
                    break;
                }
                tracing::warn!(
                    task = %self.name(),
                    error = %error,
                    "run cycle failed, backing off before retrying"
                );
                self.sleep(ERROR_BACKOFF).await;
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        tracing::info!(task = %self.name(), "task runner stopped");
    }

    /// Sleep until the timeout elapses or the runner is woken.
    ///
    /// A wake signalled while the loop is not waiting is not lost: the
    /// notify permit completes the next sleep immediately, and every wake
    /// re-reads the schedule row before acting.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = self.shared.notify.notified() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    async fn load_schedule(&self) -> Result<ScheduleState, CycleError> {
        self.repository
            .get_schedule(self.name())
            .await?
            .ok_or_else(|| CycleError::MissingSchedule(self.name().clone()))
    }

    /// Parse the persisted override expression into the shared slot.
    fn apply_override(&self, state: &ScheduleState) -> Result<(), CycleError> {
        let parsed = match state.overridden_cron.as_deref() {
            Some(expr) => Some(CronSchedule::new(expr)?),
            None => None,
        };
        *lock(&self.shared.override_schedule) = parsed;
        Ok(())
    }

    /// One pass of the state machine: sleep until due (or woken), then
    /// either skip (paused), execute, or go around again.
    async fn cycle(&self) -> Result<(), CycleError> {
        let manually_triggered = loop {
            let state = self.load_schedule().await?;
            self.apply_override(&state)?;
            *lock(&self.shared.next_run) = state.next_run;

            if self.master.has_lock() {
                if let Some(wait) = master_wait(Utc::now(), state.next_run) {
                    tracing::debug!(
                        task = %self.name(),
                        wait_secs = wait.as_secs(),
                        next = ?state.next_run,
                        "master node waiting for next fire time"
                    );
                    self.sleep(wait).await;
                }
            } else {
                tracing::debug!(
                    task = %self.name(),
                    node = %self.hostname,
                    "not holding the master lock, standing by"
                );
                self.sleep(NON_MASTER_SLEEP).await;
            }

            if !self.shared.is_alive() {
                return Ok(());
            }
            if !self.master.has_lock() {
                continue;
            }

            // Re-read the row: overrides, pauses or manual triggers may
            // have landed while this runner was asleep.
            let state = self.load_schedule().await?;
            self.apply_override(&state)?;
            *lock(&self.shared.next_run) = state.next_run;
            self.shared.active.store(state.active, Ordering::SeqCst);

            if state.run_once {
                // Clear the one-shot flag before executing so a trigger
                // arriving mid-run schedules a fresh cycle instead of
                // doubling this one.
                self.repository.set_run_once(self.name(), false).await?;
                tracing::info!(task = %self.name(), "one-shot trigger, running now");
                break true;
            }

            match state.next_run {
                Some(next) if Utc::now() >= next => break false,
                _ => continue,
            }
        };

        if !self.is_active() {
            let now = Utc::now();
            let next = self.next_scheduled_run(now);
            tracing::info!(
                task = %self.name(),
                next = ?next,
                "task is paused, skipping this run"
            );
            self.repository
                .update_next_run(self.name(), self.override_expression().as_deref(), next)
                .await?;
            *lock(&self.shared.next_run) = next;
            *lock(&self.shared.last_run_completed) = Some(now);
            return Ok(());
        }

        self.execute_once(manually_triggered).await?;

        self.repository
            .execute_retention_policy(self.name(), self.config.retention_policy())
            .await?;
        Ok(())
    }

    /// Execute the callback once and persist the outcome.
    ///
    /// Callback failures and contract violations become FAILED runs; they
    /// never propagate. Afterwards the next fire time is computed from the
    /// active expression and persisted.
    pub(crate) async fn execute_once(&self, manually_triggered: bool) -> Result<(), CycleError> {
        let started = Utc::now();
        *lock(&self.shared.current_run_started) = Some(started);
        self.shared.running.store(true, Ordering::SeqCst);

        tracing::info!(
            task = %self.name(),
            cron = %self.active_cron_expression(),
            "starting scheduled run"
        );

        let run_id = self
            .repository
            .add_task_run(self.name(), &self.hostname, started, "Task run starting.")
            .await?;
        let ctx = RunContext::new(
            run_id,
            self.name().clone(),
            self.hostname.clone(),
            Arc::clone(&self.repository),
            started,
            "Task run starting.",
        );

        if manually_triggered {
            ctx.log("Manually triggered").await?;
        }

        match self.work.run(ctx.clone()).await {
            Ok(_completion) => {
                if !ctx.has_terminal_status() {
                    // The token must have come from some other run's
                    // context; this run was never completed.
                    tracing::warn!(task = %self.name(), run_id = %run_id, "callback broke the completion contract");
                    ctx.failed(
                        "the callback returned without calling done(), failed() or dispatched() \
                         on this run's context",
                    )
                    .await?;
                }
            }
            Err(error) => {
                if ctx.has_terminal_status() {
                    tracing::warn!(
                        task = %self.name(),
                        run_id = %run_id,
                        error = %error,
                        "callback returned an error after recording a terminal status, keeping the recorded status"
                    );
                } else {
                    tracing::warn!(
                        task = %self.name(),
                        run_id = %run_id,
                        error = %error,
                        "scheduled run failed"
                    );
                    ctx.failed_with(&format!("task '{}' run failed", self.name()), &error)
                        .await?;
                }
            }
        }

        let completed = Utc::now();
        *lock(&self.shared.last_run_completed) = Some(completed);
        self.shared.running.store(false, Ordering::SeqCst);

        let next = self.next_scheduled_run(completed);
        tracing::info!(
            task = %self.name(),
            run_id = %run_id,
            elapsed_ms = (completed - started).num_milliseconds(),
            next = ?next,
            "run finished"
        );

        self.repository
            .update_next_run(self.name(), self.override_expression().as_deref(), next)
            .await?;
        *lock(&self.shared.next_run) = next;
        Ok(())
    }
}
