//! Shutdown behavior and multi-node standby.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use steward::{
    Completion, InMemoryRepository, Registry, Repository, RunContext, RunStatus,
    ScheduledTaskConfig, ScheduledWork, TaskName, WorkError, MASTER_LOCK_NAME,
};

use crate::common::{count_runs, wait_for_run_with_status};

/// Work that completes successfully.
struct DoneWork;

#[async_trait]
impl ScheduledWork for DoneWork {
    async fn run(&self, ctx: RunContext) -> Result<Completion, WorkError> {
        Ok(ctx.done("ok").await?)
    }
}

#[tokio::test]
async fn test_shutdown_releases_lock_and_stops_runners() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    registry
        .register(ScheduledTaskConfig::new("ticker", "@every 1s"), DoneWork)
        .await
        .unwrap();

    let name = TaskName::new("ticker");
    wait_for_run_with_status(
        repository.as_ref(),
        &name,
        RunStatus::Done,
        Duration::from_secs(5),
    )
    .await;

    registry.shutdown().await;
    assert!(!registry.has_master_lock());
    // The lock row is gone, so another node could claim it immediately.
    assert!(repository.get_lock(MASTER_LOCK_NAME).await.unwrap().is_none());

    // Let a cycle that was already past its shutdown check finish.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // No further runs happen after shutdown.
    let runs_at_shutdown = count_runs(repository.as_ref(), &name).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(count_runs(repository.as_ref(), &name).await, runs_at_shutdown);
}

#[tokio::test]
async fn test_only_the_master_node_executes() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());

    // First registry wins the lock; the second stands by.
    let master = Registry::start(Arc::clone(&repository)).await;
    let standby = Registry::start(Arc::clone(&repository)).await;
    assert!(master.has_master_lock());
    assert!(!standby.has_master_lock());

    master
        .register(ScheduledTaskConfig::new("on-master", "@every 1s"), DoneWork)
        .await
        .unwrap();
    standby
        .register(ScheduledTaskConfig::new("on-standby", "@every 1s"), DoneWork)
        .await
        .unwrap();

    wait_for_run_with_status(
        repository.as_ref(),
        &TaskName::new("on-master"),
        RunStatus::Done,
        Duration::from_secs(5),
    )
    .await;

    // The standby node's runner never executed anything.
    assert_eq!(
        count_runs(repository.as_ref(), &TaskName::new("on-standby")).await,
        0
    );

    standby.shutdown().await;
    master.shutdown().await;
}
