//! In-memory repository implementation.
//!
//! Thread-safe backend for tests and single-node embedding. All tables sit
//! behind one mutex, which is what makes the conditional lock writes and
//! the single terminal-status transition atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{
    LogEntry, MasterLock, Repository, RepositoryError, RunStatus, ScheduleState, TaskRun,
};
use crate::core::config::RetentionPolicy;
use crate::core::types::{RunId, TaskName};

/// Oldest run start an age-based policy still keeps, if the policy has an
/// age bound that is representable at all.
pub(super) fn retention_cutoff(
    now: DateTime<Utc>,
    max_age: Option<std::time::Duration>,
) -> Option<DateTime<Utc>> {
    let age = chrono::Duration::from_std(max_age?).ok()?;
    now.checked_sub_signed(age)
}

#[derive(Default)]
struct Tables {
    schedules: HashMap<TaskName, ScheduleState>,
    runs: BTreeMap<i64, TaskRun>,
    logs: HashMap<i64, Vec<LogEntry>>,
    locks: HashMap<String, MasterLock>,
    next_run_id: i64,
}

/// In-memory repository backend.
///
/// Data is not persisted across restarts.
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    /// Create a new empty in-memory repository.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_run_id: 1,
                ..Tables::default()
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, RepositoryError> {
        self.tables.lock().map_err(|_| RepositoryError::LockPoisoned)
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_schedule(
        &self,
        name: &TaskName,
    ) -> Result<Option<ScheduleState>, RepositoryError> {
        Ok(self.lock()?.schedules.get(name).cloned())
    }

    async fn upsert_schedule(
        &self,
        name: &TaskName,
        _default_cron: &str,
        initial_next_run: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables.schedules.contains_key(name) {
            return Ok(());
        }
        tables.schedules.insert(
            name.clone(),
            ScheduleState {
                name: name.clone(),
                active: true,
                overridden_cron: None,
                next_run: initial_next_run,
                run_once: false,
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn set_active(&self, name: &TaskName, active: bool) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let state = tables
            .schedules
            .get_mut(name)
            .ok_or_else(|| RepositoryError::NotFound(format!("schedule: {}", name)))?;
        state.active = active;
        state.last_updated = Utc::now();
        Ok(())
    }

    async fn set_run_once(&self, name: &TaskName, run_once: bool) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let state = tables
            .schedules
            .get_mut(name)
            .ok_or_else(|| RepositoryError::NotFound(format!("schedule: {}", name)))?;
        state.run_once = run_once;
        state.last_updated = Utc::now();
        Ok(())
    }

    async fn update_next_run(
        &self,
        name: &TaskName,
        overridden_cron: Option<&str>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        let state = tables
            .schedules
            .get_mut(name)
            .ok_or_else(|| RepositoryError::NotFound(format!("schedule: {}", name)))?;
        state.overridden_cron = overridden_cron.map(str::to_string);
        state.next_run = next_run;
        state.last_updated = Utc::now();
        Ok(())
    }

    async fn add_task_run(
        &self,
        name: &TaskName,
        hostname: &str,
        run_start: DateTime<Utc>,
        initial_msg: &str,
    ) -> Result<RunId, RepositoryError> {
        let mut tables = self.lock()?;
        let id = tables.next_run_id;
        tables.next_run_id += 1;
        tables.runs.insert(
            id,
            TaskRun {
                run_id: RunId::new(id),
                schedule_name: name.clone(),
                hostname: hostname.to_string(),
                status: RunStatus::Started,
                status_msg: initial_msg.to_string(),
                status_stacktrace: None,
                run_start,
                status_time: run_start,
            },
        );
        Ok(RunId::new(id))
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
        let mut tables = self.lock()?;
        let run = tables
            .runs
            .get_mut(&run_id.as_i64())
            .ok_or_else(|| RepositoryError::NotFound(format!("run: {}", run_id)))?;
        if run.status.is_terminal() {
            return Err(RepositoryError::AlreadyCompleted(run_id));
        }
        run.status = status;
        run.status_msg = status_msg.to_string();
        run.status_stacktrace = stacktrace.map(str::to_string);
        run.status_time = status_time;
        Ok(())
    }

    async fn add_log_entry(
        &self,
        run_id: RunId,
        log_time: DateTime<Utc>,
        message: &str,
        stacktrace: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if !tables.runs.contains_key(&run_id.as_i64()) {
            return Err(RepositoryError::NotFound(format!("run: {}", run_id)));
        }
        tables.logs.entry(run_id.as_i64()).or_default().push(LogEntry {
            run_id,
            log_time,
            message: message.to_string(),
            stacktrace: stacktrace.map(str::to_string),
        });
        Ok(())
    }

    async fn get_log_entries(&self, run_id: RunId) -> Result<Vec<LogEntry>, RepositoryError> {
        Ok(self
            .lock()?
            .logs
            .get(&run_id.as_i64())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_last_run(&self, name: &TaskName) -> Result<Option<TaskRun>, RepositoryError> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|run| &run.schedule_name == name)
            .max_by_key(|run| (run.run_start, run.run_id))
            .cloned())
    }

    async fn get_runs_between(
        &self,
        name: &TaskName,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskRun>, RepositoryError> {
        let tables = self.lock()?;
        let mut runs: Vec<TaskRun> = tables
            .runs
            .values()
            .filter(|run| &run.schedule_name == name && run.run_start >= from && run.run_start <= to)
            .cloned()
            .collect();
        runs.sort_by_key(|run| (run.run_start, run.run_id));
        Ok(runs)
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<TaskRun>, RepositoryError> {
        Ok(self.lock()?.runs.get(&run_id.as_i64()).cloned())
    }

    async fn execute_retention_policy(
        &self,
        name: &TaskName,
        policy: &RetentionPolicy,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let mut tables = self.lock()?;

        let mut victims: Vec<i64> = Vec::new();

        if let Some(cutoff) = retention_cutoff(now, policy.max_age) {
            victims.extend(
                tables
                    .runs
                    .values()
                    .filter(|run| &run.schedule_name == name && run.run_start < cutoff)
                    .map(|run| run.run_id.as_i64()),
            );
        }

        if let Some(max_runs) = policy.max_runs {
            let mut runs: Vec<(DateTime<Utc>, i64)> = tables
                .runs
                .values()
                .filter(|run| &run.schedule_name == name)
                .map(|run| (run.run_start, run.run_id.as_i64()))
                .collect();
            // Newest first; everything past the cap goes.
            runs.sort_by_key(|&(start, id)| std::cmp::Reverse((start, id)));
            victims.extend(runs.into_iter().skip(max_runs).map(|(_, id)| id));
        }

        victims.sort_unstable();
        victims.dedup();

        for id in &victims {
            tables.runs.remove(id);
            if policy.delete_logs {
                tables.logs.remove(id);
            }
        }

        Ok(victims.len() as u64)
    }

    async fn get_all_schedules(
        &self,
    ) -> Result<HashMap<TaskName, ScheduleState>, RepositoryError> {
        Ok(self.lock()?.schedules.clone())
    }

    async fn try_acquire_lock(
        &self,
        lock_name: &str,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.lock()?;
        match tables.locks.get(lock_name) {
            Some(lock) if lock.is_valid(now) => Ok(false),
            _ => {
                tables.locks.insert(
                    lock_name.to_string(),
                    MasterLock {
                        lock_name: lock_name.to_string(),
                        node_name: node_name.to_string(),
                        lock_taken_time: now,
                        lock_last_updated_time: now,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn keep_lock(
        &self,
        lock_name: &str,
        node_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.lock()?;
        match tables.locks.get_mut(lock_name) {
            Some(lock) if lock.node_name == node_name && lock.is_valid(now) => {
                lock.lock_last_updated_time = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_lock(&self, lock_name: &str) -> Result<Option<MasterLock>, RepositoryError> {
        Ok(self.lock()?.locks.get(lock_name).cloned())
    }

    async fn release_lock(
        &self,
        lock_name: &str,
        node_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock()?;
        if tables
            .locks
            .get(lock_name)
            .is_some_and(|lock| lock.node_name == node_name)
        {
            tables.locks.remove(lock_name);
        }
        Ok(())
    }
}
