//! Public handle for one registered scheduled task.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::context::RunContext;
use super::registry::RegistryError;
use super::runner::TaskRunner;
use crate::core::config::{Criticality, Recovery, RetentionPolicy};
use crate::core::types::{RunId, TaskName};

/// Control and inspection handle for a registered task.
///
/// Cheap to clone; all clones drive the same runner.
#[derive(Clone)]
pub struct ScheduledTask {
    runner: Arc<TaskRunner>,
}

impl ScheduledTask {
    pub(crate) fn new(runner: Arc<TaskRunner>) -> Self {
        Self { runner }
    }

    pub(crate) fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    /// The task's unique name.
    pub fn name(&self) -> &TaskName {
        self.runner.name()
    }

    /// The cron expression the task was registered with.
    pub fn default_cron_expression(&self) -> &str {
        self.runner.default_cron_expression()
    }

    /// The cron expression currently in effect: the override if one is
    /// set, otherwise the default.
    pub fn active_cron_expression(&self) -> String {
        self.runner.active_cron_expression()
    }

    /// Resume the task after [`stop`](Self::stop).
    pub async fn start(&self) -> Result<(), RegistryError> {
        self.runner.set_active(true).await
    }

    /// Pause the task. Fire times keep advancing; callbacks are skipped.
    pub async fn stop(&self) -> Result<(), RegistryError> {
        self.runner.set_active(false).await
    }

    /// Trigger an immediate run, regardless of the next fire time.
    ///
    /// On the master node the run starts as soon as the runner wakes; on
    /// other nodes the persisted one-shot flag is picked up by the master
    /// within its sleep clamp. In test mode the callback runs
    /// synchronously before this returns.
    pub async fn run_now(&self) -> Result<(), RegistryError> {
        self.runner.run_now().await
    }

    /// Override the cron expression at runtime, or revert with `None`/`""`.
    ///
    /// Invalid expressions are rejected synchronously and never stored.
    pub async fn set_override_expression(
        &self,
        expression: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.runner.set_override_expression(expression).await
    }

    /// Whether the task is currently active (not paused).
    pub fn is_active(&self) -> bool {
        self.runner.is_active()
    }

    /// Whether a run is executing right now on this node.
    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Whether the current run has exceeded the expected duration.
    pub fn is_overdue(&self) -> bool {
        self.runner.is_overdue()
    }

    /// Minutes the current run has been executing, while one is executing.
    pub fn run_time_in_minutes(&self) -> Option<i64> {
        self.runner.run_time_in_minutes()
    }

    /// When the most recent run on this node started.
    pub fn last_run_started(&self) -> Option<DateTime<Utc>> {
        self.runner.last_run_started()
    }

    /// When the most recent run on this node completed.
    pub fn last_run_completed(&self) -> Option<DateTime<Utc>> {
        self.runner.last_run_completed()
    }

    /// The next fire time, as last read from the repository.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.runner.next_run()
    }

    /// The configured criticality.
    pub fn criticality(&self) -> Criticality {
        self.runner.config().criticality()
    }

    /// The configured recovery mode.
    pub fn recovery(&self) -> Recovery {
        self.runner.config().recovery()
    }

    /// The configured retention policy.
    pub fn retention_policy(&self) -> &RetentionPolicy {
        self.runner.config().retention_policy()
    }

    /// Expected upper bound on run time in minutes (0 = no expectation).
    pub fn max_expected_minutes_to_run(&self) -> u32 {
        self.runner.config().max_expected_minutes_to_run()
    }

    /// The latest persisted run of this task, from any node.
    pub async fn last_task_run(&self) -> Result<Option<RunContext>, RegistryError> {
        let run = self.runner.repository().get_last_run(self.name()).await?;
        Ok(run.map(|run| RunContext::from_run(run, Arc::clone(self.runner.repository()))))
    }

    /// All persisted runs whose start falls within `[from, to]`.
    pub async fn task_runs_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RunContext>, RegistryError> {
        let runs = self
            .runner
            .repository()
            .get_runs_between(self.name(), from, to)
            .await?;
        Ok(runs
            .into_iter()
            .map(|run| RunContext::from_run(run, Arc::clone(self.runner.repository())))
            .collect())
    }

    /// A single persisted run by id.
    pub async fn instance(&self, run_id: RunId) -> Result<Option<RunContext>, RegistryError> {
        let run = self.runner.repository().get_run(run_id).await?;
        Ok(run.map(|run| RunContext::from_run(run, Arc::clone(self.runner.repository()))))
    }
}
