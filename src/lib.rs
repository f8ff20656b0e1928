//! steward - a distributed, persistence-backed cron scheduler.
//!
//! Each node in a cluster registers the same set of named tasks at startup.
//! A database-backed master lock ensures that at any moment at most one
//! node executes scheduled work; the others stand by, ready to take over
//! within the lock's validity window. Every run is persisted together with
//! its log trail, so operators can inspect history, trigger manual runs,
//! override cron expressions at runtime and pause individual tasks without
//! restarting anything.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward::{Registry, RunContext, ScheduledTaskConfig, SqliteRepository};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Arc::new(SqliteRepository::new("steward.db").await?);
//! let registry = Registry::start(repository).await;
//!
//! registry
//!     .register(
//!         ScheduledTaskConfig::new("nightly-cleanup", "0 0 3 * * *"),
//!         |ctx: RunContext| async move {
//!             ctx.log("pruning expired sessions").await?;
//!             Ok(ctx.done("pruned").await?)
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod repository;
pub mod scheduler;

pub use crate::core::config::{Criticality, Recovery, RetentionPolicy, ScheduledTaskConfig};
pub use crate::core::schedule::{CronSchedule, ScheduleError};
pub use crate::core::types::{RunId, TaskName};

pub use crate::repository::{
    InMemoryRepository, LogEntry, MasterLock, Repository, RepositoryError, RunStatus,
    ScheduleState, TaskRun, MASTER_LOCK_NAME, MASTER_LOCK_VALIDITY_MINUTES,
};
#[cfg(any(feature = "sqlite", test))]
pub use crate::repository::SqliteRepository;

pub use crate::scheduler::context::{Completion, RunContext};
pub use crate::scheduler::handle::ScheduledTask;
pub use crate::scheduler::registry::{Registry, RegistryError, RegistryListener};
pub use crate::scheduler::{ScheduledWork, WorkError};
