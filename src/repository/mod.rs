//! Durable storage for schedules, runs, logs and the cluster master lock.
//!
//! This module provides a trait-based repository abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryRepository;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::config::RetentionPolicy;
use crate::core::types::{RunId, TaskName};

/// Name of the single cluster-wide lock row guarding task execution.
pub const MASTER_LOCK_NAME: &str = "scheduledtask";

/// Minutes after its last heartbeat that a master lock is still honored.
pub const MASTER_LOCK_VALIDITY_MINUTES: i64 = 5;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A terminal status was already recorded for the run.
    #[error("run {0} already has a terminal status")]
    AlreadyCompleted(RunId),

    /// A non-terminal status was passed where a terminal one is required.
    #[error("status {0} is not a terminal status")]
    NotTerminal(RunStatus),

    /// Repository lock was poisoned.
    #[error("repository lock poisoned")]
    LockPoisoned,

    /// Generic backend error.
    #[error("repository error: {0}")]
    Other(String),
}

/// Status of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// The run has been created and the callback is (or is about to be) executing.
    Started,
    /// The callback finished its work.
    Done,
    /// The callback failed, or broke the completion contract.
    Failed,
    /// The callback handed the work off to another subsystem.
    Dispatched,
}

impl RunStatus {
    /// Stable string form used in persisted rows and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "STARTED",
            RunStatus::Done => "DONE",
            RunStatus::Failed => "FAILED",
            RunStatus::Dispatched => "DISPATCHED",
        }
    }

    /// Whether this status completes a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }

    /// Parse the persisted string form. Unknown values map to Started.
    pub fn parse(s: &str) -> Self {
        match s {
            "DONE" => RunStatus::Done,
            "FAILED" => RunStatus::Failed,
            "DISPATCHED" => RunStatus::Dispatched,
            _ => RunStatus::Started,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted schedule state, one row per registered task.
///
/// Only runtime state lives here; the default cron expression stays in the
/// code that registers the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleState {
    /// Unique task name.
    pub name: TaskName,
    /// False while the task is paused: fire times advance, callbacks are skipped.
    pub active: bool,
    /// Runtime override of the default cron expression.
    pub overridden_cron: Option<String>,
    /// The earliest instant the task may next fire. `None` when the active
    /// cron expression has no future occurrence.
    pub next_run: Option<DateTime<Utc>>,
    /// One-shot flag: the next eligible cycle fires immediately.
    pub run_once: bool,
    /// When this row was last written.
    pub last_updated: DateTime<Utc>,
}

/// Persisted record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    /// Repository-assigned monotonic identifier.
    pub run_id: RunId,
    /// The task this run belongs to.
    pub schedule_name: TaskName,
    /// Node that executed the run.
    pub hostname: String,
    /// Current status; mutated at most once to a terminal value.
    pub status: RunStatus,
    /// Message recorded with the latest status.
    pub status_msg: String,
    /// Stacktrace-like detail recorded with a failure.
    pub status_stacktrace: Option<String>,
    /// When the run began.
    pub run_start: DateTime<Utc>,
    /// When the latest status was recorded.
    pub status_time: DateTime<Utc>,
}

/// One log line recorded against a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// The run this entry belongs to.
    pub run_id: RunId,
    /// When the entry was recorded.
    pub log_time: DateTime<Utc>,
    /// The message.
    pub message: String,
    /// Optional stacktrace-like detail.
    pub stacktrace: Option<String>,
}

/// The single cluster-wide lock row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterLock {
    /// Lock identity, see [`MASTER_LOCK_NAME`].
    pub lock_name: String,
    /// Node currently holding the lock.
    pub node_name: String,
    /// When the current holder first took the lock.
    pub lock_taken_time: DateTime<Utc>,
    /// Last heartbeat from the holder.
    pub lock_last_updated_time: DateTime<Utc>,
}

impl MasterLock {
    /// Whether the lock is still within its validity window at `now`.
    ///
    /// A holder whose last heartbeat is older than the window has lost the
    /// lock and any node may claim it.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now - self.lock_last_updated_time < chrono::Duration::minutes(MASTER_LOCK_VALIDITY_MINUTES)
    }
}

/// Repository contract for all durable scheduler state.
///
/// Lock mutations must be conditional writes so two nodes cannot win the
/// same claim; run-status mutations must enforce the single terminal
/// transition. Both in-process backends do this under one table lock, the
/// SQLite backend with conditional `UPDATE ... WHERE` clauses.
#[async_trait]
pub trait Repository: Send + Sync {
    // Schedule operations

    /// Get the schedule row for a task.
    async fn get_schedule(
        &self,
        name: &TaskName,
    ) -> Result<Option<ScheduleState>, RepositoryError>;

    /// Idempotently create the schedule row for a task.
    ///
    /// When a row already exists its `active`, `overridden_cron`, `next_run`
    /// and `run_once` values are preserved. The default cron expression is
    /// not persisted; it only identifies what produced `initial_next_run`.
    async fn upsert_schedule(
        &self,
        name: &TaskName,
        default_cron: &str,
        initial_next_run: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;

    /// Pause (`false`) or resume (`true`) a task.
    async fn set_active(&self, name: &TaskName, active: bool) -> Result<(), RepositoryError>;

    /// Set or clear the one-shot trigger flag.
    async fn set_run_once(&self, name: &TaskName, run_once: bool) -> Result<(), RepositoryError>;

    /// Atomically write the override expression and next fire time pair.
    async fn update_next_run(
        &self,
        name: &TaskName,
        overridden_cron: Option<&str>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError>;

    // Run operations

    /// Insert a new run with status [`RunStatus::Started`]; returns its id.
    async fn add_task_run(
        &self,
        name: &TaskName,
        hostname: &str,
        run_start: DateTime<Utc>,
        initial_msg: &str,
    ) -> Result<RunId, RepositoryError>;

    /// Record the single terminal status transition for a run.
    ///
    /// Rejects non-terminal statuses with [`RepositoryError::NotTerminal`]
    /// and repeat terminal writes with [`RepositoryError::AlreadyCompleted`].
    async fn set_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        status_time: DateTime<Utc>,
        status_msg: &str,
        stacktrace: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Append a log entry to a run.
    async fn add_log_entry(
        &self,
        run_id: RunId,
        log_time: DateTime<Utc>,
        message: &str,
        stacktrace: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Get a run's log entries in insertion order.
    async fn get_log_entries(&self, run_id: RunId) -> Result<Vec<LogEntry>, RepositoryError>;

    /// Get the latest run for a task, by run start then run id.
    async fn get_last_run(&self, name: &TaskName) -> Result<Option<TaskRun>, RepositoryError>;

    /// Get all runs for a task whose start falls in `[from, to]`, oldest first.
    async fn get_runs_between(
        &self,
        name: &TaskName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskRun>, RepositoryError>;

    /// Get a single run by id.
    async fn get_run(&self, run_id: RunId) -> Result<Option<TaskRun>, RepositoryError>;

    /// Delete runs (and, per policy, their logs) that fall outside the
    /// retention window or count cap. Returns the number of runs deleted.
    async fn execute_retention_policy(
        &self,
        name: &TaskName,
        policy: &RetentionPolicy,
    ) -> Result<u64, RepositoryError>;

    /// Get every schedule row, keyed by task name.
    async fn get_all_schedules(
        &self,
    ) -> Result<HashMap<TaskName, ScheduleState>, RepositoryError>;

    // Master lock operations

    /// Try to claim the lock at `now`.
    ///
    /// Succeeds when no row exists or the existing row has fallen out of its
    /// validity window. `Ok(false)` is contention, not an error.
    async fn try_acquire_lock(
        &self,
        lock_name: &str,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Heartbeat the lock at `now`.
    ///
    /// Succeeds only while this node holds the lock inside its validity
    /// window; updates the last-heartbeat time.
    async fn keep_lock(
        &self,
        lock_name: &str,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Read the current lock row.
    async fn get_lock(&self, lock_name: &str) -> Result<Option<MasterLock>, RepositoryError>;

    /// Best-effort release on shutdown; only deletes this node's own row.
    async fn release_lock(
        &self,
        lock_name: &str,
        node_name: &str,
    ) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_status_string_round_trip() {
        for status in [
            RunStatus::Started,
            RunStatus::Done,
            RunStatus::Failed,
            RunStatus::Dispatched,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_unknown_status_string_maps_to_started() {
        assert_eq!(RunStatus::parse("SOMETHING_ELSE"), RunStatus::Started);
    }

    #[test]
    fn test_only_started_is_non_terminal() {
        assert!(!RunStatus::Started.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Dispatched.is_terminal());
    }

    #[test]
    fn test_master_lock_validity_window() {
        let taken = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let lock = MasterLock {
            lock_name: MASTER_LOCK_NAME.to_string(),
            node_name: "node-1".to_string(),
            lock_taken_time: taken,
            lock_last_updated_time: taken,
        };

        assert!(lock.is_valid(taken));
        assert!(lock.is_valid(taken + chrono::Duration::minutes(4)));
        // Exactly five minutes after the last heartbeat the lock is gone.
        assert!(!lock.is_valid(taken + chrono::Duration::minutes(5)));
        assert!(!lock.is_valid(taken + chrono::Duration::minutes(6)));
    }
}
