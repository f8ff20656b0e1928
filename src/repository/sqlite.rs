//! SQLite repository implementation.
//!
//! Persistent storage using sqlx with automatic schema migration. All lock
//! and status mutations use conditional UPDATEs so that concurrent nodes
//! sharing the database cannot both win the same transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use super::memory::retention_cutoff;
use super::{
    LogEntry, MasterLock, Repository, RepositoryError, RunStatus, ScheduleState, TaskRun,
    MASTER_LOCK_VALIDITY_MINUTES,
};
use crate::core::config::RetentionPolicy;
use crate::core::types::{RunId, TaskName};

/// SQLite repository backend.
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (or create) a database file and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| RepositoryError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::Other(e.to_string()))?;

        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RepositoryError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::Other(e.to_string()))?;

        let repository = Self { pool };
        repository.run_migrations().await?;
        Ok(repository)
    }

    async fn run_migrations(&self) -> Result<(), RepositoryError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn other(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Other(e.to_string())
}

/// Millis threshold before which a lock heartbeat counts as expired.
fn expiry_threshold(now: DateTime<Utc>) -> i64 {
    to_millis(now - chrono::Duration::minutes(MASTER_LOCK_VALIDITY_MINUTES))
}

type ScheduleRow = (String, bool, Option<String>, Option<i64>, bool, i64);
type RunRow = (i64, String, String, String, String, Option<String>, i64, i64);

fn schedule_from_row(row: ScheduleRow) -> ScheduleState {
    ScheduleState {
        name: TaskName::new(row.0),
        active: row.1,
        overridden_cron: row.2,
        next_run: row.3.map(from_millis),
        run_once: row.4,
        last_updated: from_millis(row.5),
    }
}

fn run_from_row(row: RunRow) -> TaskRun {
    TaskRun {
        run_id: RunId::new(row.0),
        schedule_name: TaskName::new(row.1),
        hostname: row.2,
        status: RunStatus::parse(&row.3),
        status_msg: row.4,
        status_stacktrace: row.5,
        run_start: from_millis(row.6),
        status_time: from_millis(row.7),
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_schedule(
        &self,
        name: &TaskName,
    ) -> Result<Option<ScheduleState>, RepositoryError> {
        let row: Option<ScheduleRow> = sqlx::query_as(
            "SELECT name, active, overridden_cron, next_run, run_once, last_updated \
             FROM schedules WHERE name = ?",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(other)?;

        Ok(row.map(schedule_from_row))
    }

    async fn upsert_schedule(
        &self,
        name: &TaskName,
        _default_cron: &str,
        initial_next_run: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO schedules (name, active, overridden_cron, next_run, run_once, last_updated) \
             VALUES (?, 1, NULL, ?, 0, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name.as_str())
        .bind(initial_next_run.map(to_millis))
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(other)?;
        Ok(())
    }

    async fn set_active(&self, name: &TaskName, active: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE schedules SET active = ?, last_updated = ? WHERE name = ?")
            .bind(active)
            .bind(to_millis(Utc::now()))
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(other)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("schedule: {}", name)));
        }
        Ok(())
    }

    async fn set_run_once(&self, name: &TaskName, run_once: bool) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE schedules SET run_once = ?, last_updated = ? WHERE name = ?")
                .bind(run_once)
                .bind(to_millis(Utc::now()))
                .bind(name.as_str())
                .execute(&self.pool)
                .await
                .map_err(other)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("schedule: {}", name)));
        }
        Ok(())
    }

    async fn update_next_run(
        &self,
        name: &TaskName,
        overridden_cron: Option<&str>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE schedules SET overridden_cron = ?, next_run = ?, last_updated = ? \
             WHERE name = ?",
        )
        .bind(overridden_cron)
        .bind(next_run.map(to_millis))
        .bind(to_millis(Utc::now()))
        .bind(name.as_str())
        .execute(&self.pool)
        .await
        .map_err(other)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("schedule: {}", name)));
        }
        Ok(())
    }

    async fn add_task_run(
        &self,
        name: &TaskName,
        hostname: &str,
        run_start: DateTime<Utc>,
        initial_msg: &str,
    ) -> Result<RunId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO schedule_runs \
             (schedule_name, hostname, status, status_msg, status_stacktrace, run_start, status_time) \
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(name.as_str())
        .bind(hostname)
        .bind(RunStatus::Started.as_str())
        .bind(initial_msg)
        .bind(to_millis(run_start))
        .bind(to_millis(run_start))
        .execute(&self.pool)
        .await
        .map_err(other)?;

        Ok(RunId::new(result.last_insert_rowid()))
    }

    async fn set_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        status_time: DateTime<Utc>,
        status_msg: &str,
        stacktrace: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if !status.is_terminal() {
            return Err(RepositoryError::NotTerminal(status));
        }

        let result = sqlx::query(
            "UPDATE schedule_runs SET status = ?, status_msg = ?, status_stacktrace = ?, status_time = ? \
             WHERE run_id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(status_msg)
        .bind(stacktrace)
        .bind(to_millis(status_time))
        .bind(run_id.as_i64())
        .bind(RunStatus::Started.as_str())
        .execute(&self.pool)
        .await
        .map_err(other)?;

        if result.rows_affected() == 0 {
            // Either the run does not exist, or it already completed.
            return match self.get_run(run_id).await? {
                Some(_) => Err(RepositoryError::AlreadyCompleted(run_id)),
                None => Err(RepositoryError::NotFound(format!("run: {}", run_id))),
            };
        }
        Ok(())
    }

    async fn add_log_entry(
        &self,
        run_id: RunId,
        log_time: DateTime<Utc>,
        message: &str,
        stacktrace: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if self.get_run(run_id).await?.is_none() {
            return Err(RepositoryError::NotFound(format!("run: {}", run_id)));
        }

        sqlx::query(
            "INSERT INTO schedule_logs (run_id, log_time, message, stacktrace) VALUES (?, ?, ?, ?)",
        )
        .bind(run_id.as_i64())
        .bind(to_millis(log_time))
        .bind(message)
        .bind(stacktrace)
        .execute(&self.pool)
        .await
        .map_err(other)?;
        Ok(())
    }

    async fn get_log_entries(&self, run_id: RunId) -> Result<Vec<LogEntry>, RepositoryError> {
        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(
            "SELECT log_time, message, stacktrace FROM schedule_logs \
             WHERE run_id = ? ORDER BY log_id",
        )
        .bind(run_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(other)?;

        Ok(rows
            .into_iter()
            .map(|(log_time, message, stacktrace)| LogEntry {
                run_id,
                log_time: from_millis(log_time),
                message,
                stacktrace,
            })
            .collect())
    }

    async fn get_last_run(&self, name: &TaskName) -> Result<Option<TaskRun>, RepositoryError> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT run_id, schedule_name, hostname, status, status_msg, status_stacktrace, \
             run_start, status_time \
             FROM schedule_runs WHERE schedule_name = ? \
             ORDER BY run_start DESC, run_id DESC LIMIT 1",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(other)?;

        Ok(row.map(run_from_row))
    }

    async fn get_runs_between(
        &self,
        name: &TaskName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskRun>, RepositoryError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT run_id, schedule_name, hostname, status, status_msg, status_stacktrace, \
             run_start, status_time \
             FROM schedule_runs \
             WHERE schedule_name = ? AND run_start >= ? AND run_start <= ? \
             ORDER BY run_start, run_id",
        )
        .bind(name.as_str())
        .bind(to_millis(from))
        .bind(to_millis(to))
        .fetch_all(&self.pool)
        .await
        .map_err(other)?;

        Ok(rows.into_iter().map(run_from_row).collect())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<TaskRun>, RepositoryError> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT run_id, schedule_name, hostname, status, status_msg, status_stacktrace, \
             run_start, status_time \
             FROM schedule_runs WHERE run_id = ?",
        )
        .bind(run_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(other)?;

        Ok(row.map(run_from_row))
    }

    async fn execute_retention_policy(
        &self,
        name: &TaskName,
        policy: &RetentionPolicy,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let mut victims: Vec<i64> = Vec::new();

        if let Some(cutoff) = retention_cutoff(now, policy.max_age) {
            let rows: Vec<(i64,)> = sqlx::query_as(
                "SELECT run_id FROM schedule_runs WHERE schedule_name = ? AND run_start < ?",
            )
            .bind(name.as_str())
            .bind(to_millis(cutoff))
            .fetch_all(&self.pool)
            .await
            .map_err(other)?;
            victims.extend(rows.into_iter().map(|(id,)| id));
        }

        if let Some(max_runs) = policy.max_runs {
            // Everything beyond the newest `max_runs` rows.
            let rows: Vec<(i64,)> = sqlx::query_as(
                "SELECT run_id FROM schedule_runs WHERE schedule_name = ? \
                 ORDER BY run_start DESC, run_id DESC LIMIT -1 OFFSET ?",
            )
            .bind(name.as_str())
            .bind(max_runs as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(other)?;
            victims.extend(rows.into_iter().map(|(id,)| id));
        }

        victims.sort_unstable();
        victims.dedup();

        if victims.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(other)?;
        for id in &victims {
            if policy.delete_logs {
                sqlx::query("DELETE FROM schedule_logs WHERE run_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(other)?;
            }
            sqlx::query("DELETE FROM schedule_runs WHERE run_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(other)?;
        }
        tx.commit().await.map_err(other)?;

        Ok(victims.len() as u64)
    }

    async fn get_all_schedules(
        &self,
    ) -> Result<HashMap<TaskName, ScheduleState>, RepositoryError> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT name, active, overridden_cron, next_run, run_once, last_updated FROM schedules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(other)?;

        Ok(rows
            .into_iter()
            .map(schedule_from_row)
            .map(|state| (state.name.clone(), state))
            .collect())
    }

    async fn try_acquire_lock(
        &self,
        lock_name: &str,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO master_lock (lock_name, node_name, lock_taken_time, lock_last_updated_time) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(lock_name) DO NOTHING",
        )
        .bind(lock_name)
        .bind(node_name)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(other)?;

        if inserted.rows_affected() > 0 {
            return Ok(true);
        }

        // A row exists; claim it only if its heartbeat has expired.
        let claimed = sqlx::query(
            "UPDATE master_lock \
             SET node_name = ?, lock_taken_time = ?, lock_last_updated_time = ? \
             WHERE lock_name = ? AND lock_last_updated_time <= ?",
        )
        .bind(node_name)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .bind(lock_name)
        .bind(expiry_threshold(now))
        .execute(&self.pool)
        .await
        .map_err(other)?;

        Ok(claimed.rows_affected() > 0)
    }

    async fn keep_lock(
        &self,
        lock_name: &str,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE master_lock SET lock_last_updated_time = ? \
             WHERE lock_name = ? AND node_name = ? AND lock_last_updated_time > ?",
        )
        .bind(to_millis(now))
        .bind(lock_name)
        .bind(node_name)
        .bind(expiry_threshold(now))
        .execute(&self.pool)
        .await
        .map_err(other)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_lock(&self, lock_name: &str) -> Result<Option<MasterLock>, RepositoryError> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT lock_name, node_name, lock_taken_time, lock_last_updated_time \
             FROM master_lock WHERE lock_name = ?",
        )
        .bind(lock_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(other)?;

        Ok(row.map(|(lock_name, node_name, taken, updated)| MasterLock {
            lock_name,
            node_name,
            lock_taken_time: from_millis(taken),
            lock_last_updated_time: from_millis(updated),
        }))
    }

    async fn release_lock(
        &self,
        lock_name: &str,
        node_name: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM master_lock WHERE lock_name = ? AND node_name = ?")
            .bind(lock_name)
            .bind(node_name)
            .execute(&self.pool)
            .await
            .map_err(other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MASTER_LOCK_NAME;
    use chrono::TimeZone;

    fn name(s: &str) -> TaskName {
        TaskName::new(s)
    }

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, min, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_preserves_existing_state() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.upsert_schedule(&name("a"), "@hourly", Some(at(12, 5)))
            .await
            .unwrap();
        repo.set_active(&name("a"), false).await.unwrap();
        repo.update_next_run(&name("a"), Some("@every 1m"), Some(at(13, 0)))
            .await
            .unwrap();

        repo.upsert_schedule(&name("a"), "@hourly", Some(at(14, 0)))
            .await
            .unwrap();

        let state = repo.get_schedule(&name("a")).await.unwrap().unwrap();
        assert!(!state.active);
        assert_eq!(state.overridden_cron.as_deref(), Some("@every 1m"));
        assert_eq!(state.next_run, Some(at(13, 0)));
    }

    #[tokio::test]
    async fn test_run_lifecycle_and_terminal_transition() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let run_id = repo
            .add_task_run(&name("a"), "node-1", at(12, 0), "starting")
            .await
            .unwrap();

        let run = repo.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);
        assert_eq!(run.hostname, "node-1");
        assert_eq!(run.run_start, at(12, 0));

        repo.set_run_status(run_id, RunStatus::Done, at(12, 1), "finished", None)
            .await
            .unwrap();

        let repeat = repo
            .set_run_status(run_id, RunStatus::Failed, at(12, 2), "late", None)
            .await;
        assert!(matches!(repeat, Err(RepositoryError::AlreadyCompleted(_))));
    }

    #[tokio::test]
    async fn test_set_status_for_unknown_run_is_not_found() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let result = repo
            .set_run_status(RunId::new(404), RunStatus::Done, at(12, 0), "", None)
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_run_ids_are_monotonic() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let first = repo
            .add_task_run(&name("a"), "node-1", at(12, 0), "one")
            .await
            .unwrap();
        let second = repo
            .add_task_run(&name("a"), "node-1", at(12, 1), "two")
            .await
            .unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_log_entries_keep_insertion_order() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let run_id = repo
            .add_task_run(&name("a"), "node-1", at(12, 0), "starting")
            .await
            .unwrap();

        repo.add_log_entry(run_id, at(12, 0), "first", None).await.unwrap();
        repo.add_log_entry(run_id, at(12, 0), "second", Some("trace"))
            .await
            .unwrap();

        let entries = repo.get_log_entries(run_id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
        assert_eq!(entries[1].stacktrace.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn test_get_last_run_and_runs_between() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        for min in [0, 10, 20] {
            repo.add_task_run(&name("a"), "node-1", at(12, min), "run")
                .await
                .unwrap();
        }

        let last = repo.get_last_run(&name("a")).await.unwrap().unwrap();
        assert_eq!(last.run_start, at(12, 20));

        let runs = repo
            .get_runs_between(&name("a"), at(12, 0), at(12, 10))
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_start, at(12, 0));
    }

    #[tokio::test]
    async fn test_retention_by_age_and_count() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        let old_run = repo
            .add_task_run(&name("a"), "node-1", old, "old")
            .await
            .unwrap();
        repo.add_log_entry(old_run, old, "old log", None).await.unwrap();

        let base = Utc::now() - chrono::Duration::hours(4);
        for i in 0..4 {
            repo.add_task_run(
                &name("a"),
                "node-1",
                base + chrono::Duration::hours(i),
                "recent",
            )
            .await
            .unwrap();
        }

        let policy = RetentionPolicy::keep_days(7).with_max_runs(2);
        let deleted = repo
            .execute_retention_policy(&name("a"), &policy)
            .await
            .unwrap();

        assert_eq!(deleted, 3);
        assert!(repo.get_run(old_run).await.unwrap().is_none());
        assert!(repo.get_log_entries(old_run).await.unwrap().is_empty());
        let survivors = repo
            .get_runs_between(&name("a"), base, Utc::now())
            .await
            .unwrap();
        assert_eq!(survivors.len(), 2);
    }

    #[tokio::test]
    async fn test_get_all_schedules() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        repo.upsert_schedule(&name("a"), "@hourly", None).await.unwrap();
        repo.upsert_schedule(&name("b"), "@daily", None).await.unwrap();

        let all = repo.get_all_schedules().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&name("b")));
    }

    #[tokio::test]
    async fn test_lock_acquire_contend_and_expire() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let taken = at(12, 0);

        assert!(repo
            .try_acquire_lock(MASTER_LOCK_NAME, "node-1", taken)
            .await
            .unwrap());
        assert!(!repo
            .try_acquire_lock(MASTER_LOCK_NAME, "node-2", taken + chrono::Duration::minutes(1))
            .await
            .unwrap());

        // After the validity window another node claims the row.
        let later = taken + chrono::Duration::minutes(6);
        assert!(repo
            .try_acquire_lock(MASTER_LOCK_NAME, "node-2", later)
            .await
            .unwrap());

        let lock = repo.get_lock(MASTER_LOCK_NAME).await.unwrap().unwrap();
        assert_eq!(lock.node_name, "node-2");
        assert_eq!(lock.lock_taken_time, later);
    }

    #[tokio::test]
    async fn test_keep_lock_heartbeats_only_within_window() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let taken = at(12, 0);
        repo.try_acquire_lock(MASTER_LOCK_NAME, "node-1", taken)
            .await
            .unwrap();

        assert!(repo
            .keep_lock(MASTER_LOCK_NAME, "node-1", taken + chrono::Duration::minutes(4))
            .await
            .unwrap());
        assert!(!repo
            .keep_lock(MASTER_LOCK_NAME, "node-2", taken + chrono::Duration::minutes(4))
            .await
            .unwrap());
        assert!(!repo
            .keep_lock(MASTER_LOCK_NAME, "node-1", taken + chrono::Duration::minutes(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_release_lock_only_removes_own_row() {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let now = at(12, 0);
        repo.try_acquire_lock(MASTER_LOCK_NAME, "node-1", now)
            .await
            .unwrap();

        repo.release_lock(MASTER_LOCK_NAME, "node-2").await.unwrap();
        assert!(repo.get_lock(MASTER_LOCK_NAME).await.unwrap().is_some());

        repo.release_lock(MASTER_LOCK_NAME, "node-1").await.unwrap();
        assert!(repo.get_lock(MASTER_LOCK_NAME).await.unwrap().is_none());
    }
}
