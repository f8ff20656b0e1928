//! Process-wide directory of scheduled tasks.
//!
//! Owns the master lock keeper and one runner per registered task. At most
//! one registry should exist per process.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::handle::ScheduledTask;
use super::lock::{MasterLockKeeper, MasterSignal, WakeRoster};
use super::runner::TaskRunner;
use super::ScheduledWork;
use async_trait::async_trait;

use crate::core::config::ScheduledTaskConfig;
use crate::core::schedule::{CronSchedule, ScheduleError};
use crate::core::types::TaskName;
use crate::repository::{
    MasterLock, Repository, RepositoryError, ScheduleState, MASTER_LOCK_NAME,
};

/// Errors surfaced by the registry and task handles.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A task with this name is already registered in this process.
    #[error("a task named '{0}' is already registered")]
    DuplicateTask(TaskName),

    /// The cron expression did not parse.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The registry has been shut down.
    #[error("the registry has been shut down")]
    ShutDown,
}

/// Observer of registry lifecycle events.
#[async_trait]
pub trait RegistryListener: Send + Sync {
    /// Called after a task has been registered and its runner started.
    async fn on_task_created(&self, task: &ScheduledTask);
}

/// Process-wide coordinator: registers tasks, publishes master-lock state
/// and drives shutdown.
pub struct Registry {
    repository: Arc<dyn Repository>,
    tasks: RwLock<HashMap<TaskName, ScheduledTask>>,
    listeners: RwLock<Vec<Arc<dyn RegistryListener>>>,
    signal: MasterSignal,
    roster: Arc<WakeRoster>,
    keeper: Option<Arc<MasterLockKeeper>>,
    keeper_handle: Mutex<Option<JoinHandle<()>>>,
    hostname: String,
    test_mode: bool,
    shut_down: AtomicBool,
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

impl Registry {
    fn build(repository: Arc<dyn Repository>, test_mode: bool) -> Self {
        let hostname = local_hostname();
        let signal = MasterSignal::default();
        let roster = Arc::new(WakeRoster::default());

        let keeper = (!test_mode).then(|| {
            Arc::new(MasterLockKeeper::new(
                Arc::clone(&repository),
                hostname.clone(),
                signal.clone(),
                Arc::clone(&roster),
            ))
        });

        Self {
            repository,
            tasks: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            signal,
            roster,
            keeper,
            keeper_handle: Mutex::new(None),
            hostname,
            test_mode,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start a live registry: spawns the master lock keeper, which makes
    /// its first acquisition attempt before this returns.
    pub async fn start(repository: Arc<dyn Repository>) -> Self {
        let registry = Self::build(repository, false);
        if let Some(keeper) = &registry.keeper {
            keeper.tick(Utc::now()).await;
            let handle = tokio::spawn(Arc::clone(keeper).run());
            *registry
                .keeper_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        tracing::info!(node = %registry.hostname, "scheduler registry started");
        registry
    }

    /// Start a registry in test mode.
    ///
    /// No background loops run: registering a task does not spawn its
    /// runner, no lock keeper exists, and `run_now()` executes the
    /// callback synchronously on the caller's task. This is the
    /// deterministic single-process path for unit tests.
    pub fn test_mode(repository: Arc<dyn Repository>) -> Self {
        Self::build(repository, true)
    }

    /// Register a task and, outside test mode, start its runner.
    ///
    /// The schedule row is created if missing; an existing row keeps its
    /// runtime state (pause flag, override, next fire time) across process
    /// restarts. Listeners are notified after the task is visible.
    pub async fn register<W>(
        &self,
        config: ScheduledTaskConfig,
        work: W,
    ) -> Result<ScheduledTask, RegistryError>
    where
        W: ScheduledWork + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }

        let schedule = CronSchedule::new(config.cron_expression())?;
        let name = config.name().clone();

        {
            let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
            if tasks.contains_key(&name) {
                return Err(RegistryError::DuplicateTask(name));
            }
        }

        let initial_next_run = schedule.next_after(Utc::now()).ok();
        self.repository
            .upsert_schedule(&name, config.cron_expression(), initial_next_run)
            .await?;

        let runner = Arc::new(TaskRunner::new(
            config,
            schedule,
            Arc::clone(&self.repository),
            self.signal.clone(),
            Arc::new(work),
            self.hostname.clone(),
            self.test_mode,
        ));
        self.roster.add(runner.notify_handle());

        if !self.test_mode {
            tokio::spawn(Arc::clone(&runner).run_loop());
        }

        let task = ScheduledTask::new(runner);
        {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            tasks.insert(name.clone(), task.clone());
        }
        tracing::info!(task = %name, "scheduled task registered");

        let listeners: Vec<Arc<dyn RegistryListener>> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners.clone()
        };
        for listener in listeners {
            listener.on_task_created(&task).await;
        }

        Ok(task)
    }

    /// Subscribe to registry lifecycle events.
    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// All tasks registered in this process, keyed by name.
    pub fn get_scheduled_tasks(&self) -> HashMap<TaskName, ScheduledTask> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One registered task by name.
    pub fn get_scheduled_task(&self, name: &TaskName) -> Option<ScheduledTask> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All schedule rows as persisted, including ones registered by other
    /// nodes.
    pub async fn get_schedules_from_repository(
        &self,
    ) -> Result<HashMap<TaskName, ScheduleState>, RegistryError> {
        Ok(self.repository.get_all_schedules().await?)
    }

    /// The current master lock row, if any node holds one.
    pub async fn get_master_lock(&self) -> Result<Option<MasterLock>, RegistryError> {
        Ok(self.repository.get_lock(MASTER_LOCK_NAME).await?)
    }

    /// Whether this node currently holds the master lock.
    pub fn has_master_lock(&self) -> bool {
        self.signal.has_lock()
    }

    /// This node's identifier, recorded on runs and the lock row.
    pub fn node_name(&self) -> &str {
        &self.hostname
    }

    /// Stop every runner and the lock keeper, then release the lock.
    ///
    /// A callback that is currently executing is not interrupted; its
    /// runner exits once it returns. The master lock release is awaited,
    /// so a sibling node can claim it immediately afterwards.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(node = %self.hostname, "shutting down scheduler registry");

        let tasks = self.get_scheduled_tasks();
        for task in tasks.values() {
            task.runner().kill();
        }

        if let Some(keeper) = &self.keeper {
            keeper.shutdown();
        }
        let handle = self
            .keeper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
