//! The handle a user callback records its log lines and terminal status
//! against.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::types::{RunId, TaskName};
use crate::repository::{LogEntry, Repository, RepositoryError, RunStatus, TaskRun};

/// Proof that a terminal status was recorded through a [`RunContext`].
///
/// Only `done`, `failed` and `dispatched` produce one; a callback cannot
/// construct it any other way. It exists purely so the runner can detect
/// callbacks that return without completing their run.
#[derive(Debug)]
pub struct Completion(pub(crate) ());

struct RunState {
    status: RunStatus,
    status_msg: String,
    status_stacktrace: Option<String>,
    status_time: DateTime<Utc>,
}

struct ContextInner {
    run_id: RunId,
    task_name: TaskName,
    hostname: String,
    run_start: DateTime<Utc>,
    repository: Arc<dyn Repository>,
    state: Mutex<RunState>,
}

/// Handle for one task run, passed into the user callback.
///
/// Cloning is cheap; all clones observe the same run.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<ContextInner>,
}

impl RunContext {
    /// Context for a brand new run that was just inserted as STARTED.
    pub(crate) fn new(
        run_id: RunId,
        task_name: TaskName,
        hostname: String,
        repository: Arc<dyn Repository>,
        run_start: DateTime<Utc>,
        initial_msg: &str,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                task_name,
                hostname,
                run_start,
                repository,
                state: Mutex::new(RunState {
                    status: RunStatus::Started,
                    status_msg: initial_msg.to_string(),
                    status_stacktrace: None,
                    status_time: run_start,
                }),
            }),
        }
    }

    /// Context over a previously persisted run, e.g. for inspection.
    pub(crate) fn from_run(run: TaskRun, repository: Arc<dyn Repository>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id: run.run_id,
                task_name: run.schedule_name,
                hostname: run.hostname,
                run_start: run.run_start,
                repository,
                state: Mutex::new(RunState {
                    status: run.status,
                    status_msg: run.status_msg,
                    status_stacktrace: run.status_stacktrace,
                    status_time: run.status_time,
                }),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The run's repository-assigned id.
    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// Name of the task this run belongs to.
    pub fn task_name(&self) -> &TaskName {
        &self.inner.task_name
    }

    /// Node executing (or having executed) this run.
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// When the run began.
    pub fn run_started(&self) -> DateTime<Utc> {
        self.inner.run_start
    }

    /// Latest status recorded through this context.
    pub fn status(&self) -> RunStatus {
        self.state().status
    }

    /// Message recorded with the latest status.
    pub fn status_msg(&self) -> String {
        self.state().status_msg.clone()
    }

    /// Stacktrace-like detail recorded with a failure, if any.
    pub fn status_stacktrace(&self) -> Option<String> {
        self.state().status_stacktrace.clone()
    }

    /// When the latest status was recorded.
    pub fn status_time(&self) -> DateTime<Utc> {
        self.state().status_time
    }

    pub(crate) fn has_terminal_status(&self) -> bool {
        self.state().status.is_terminal()
    }

    /// Append a log line to this run.
    pub async fn log(&self, msg: &str) -> Result<(), RepositoryError> {
        self.inner
            .repository
            .add_log_entry(self.inner.run_id, Utc::now(), msg, None)
            .await
    }

    /// Append a log line carrying error detail.
    pub async fn log_error(
        &self,
        msg: &str,
        error: &(dyn std::error::Error + Sync),
    ) -> Result<(), RepositoryError> {
        self.inner
            .repository
            .add_log_entry(
                self.inner.run_id,
                Utc::now(),
                msg,
                Some(&error_trace(error)),
            )
            .await
    }

    /// This run's log entries in insertion order.
    pub async fn log_entries(&self) -> Result<Vec<LogEntry>, RepositoryError> {
        self.inner.repository.get_log_entries(self.inner.run_id).await
    }

    /// The latest persisted run of the same task.
    pub async fn previous_run(&self) -> Result<Option<TaskRun>, RepositoryError> {
        self.inner.repository.get_last_run(&self.inner.task_name).await
    }

    /// Complete the run successfully.
    pub async fn done(&self, msg: &str) -> Result<Completion, RepositoryError> {
        self.transition(RunStatus::Done, msg, None).await
    }

    /// Complete the run as failed.
    pub async fn failed(&self, msg: &str) -> Result<Completion, RepositoryError> {
        self.transition(RunStatus::Failed, msg, None).await
    }

    /// Complete the run as failed, capturing the error's source chain.
    pub async fn failed_with(
        &self,
        msg: &str,
        error: &(dyn std::error::Error + Sync),
    ) -> Result<Completion, RepositoryError> {
        self.transition(RunStatus::Failed, msg, Some(error_trace(error)))
            .await
    }

    /// Complete the run as handed off to another subsystem.
    ///
    /// Terminal from the scheduler's perspective; whether the dispatched
    /// work eventually succeeds is not this engine's concern.
    pub async fn dispatched(&self, msg: &str) -> Result<Completion, RepositoryError> {
        self.transition(RunStatus::Dispatched, msg, None).await
    }

    async fn transition(
        &self,
        status: RunStatus,
        msg: &str,
        stacktrace: Option<String>,
    ) -> Result<Completion, RepositoryError> {
        let now = Utc::now();
        self.inner
            .repository
            .set_run_status(self.inner.run_id, status, now, msg, stacktrace.as_deref())
            .await?;

        {
            let mut state = self.state();
            state.status = status;
            state.status_msg = msg.to_string();
            state.status_stacktrace = stacktrace.clone();
            state.status_time = now;
        }

        self.inner
            .repository
            .add_log_entry(
                self.inner.run_id,
                now,
                &format!("[{}] {}", status, msg),
                stacktrace.as_deref(),
            )
            .await?;

        Ok(Completion(()))
    }
}

/// Render an error and its source chain as a multi-line string, the closest
/// thing to a stacktrace a boxed error carries.
pub(crate) fn error_trace(error: &(dyn std::error::Error + Sync)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
