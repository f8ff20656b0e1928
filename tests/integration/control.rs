//! Runtime control plane: manual triggers, overrides, pausing.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use steward::{
    Completion, InMemoryRepository, Registry, Repository, RunContext, RunStatus,
    ScheduledTaskConfig, ScheduledWork, TaskName, WorkError,
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
async fn test_run_now_triggers_immediate_run() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    // A daily task would otherwise not fire during this test.
    let task = registry
        .register(ScheduledTaskConfig::new("manual", "@daily"), DoneWork)
        .await
        .unwrap();

    // Give the runner a moment to enter its sleep before poking it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    task.run_now().await.unwrap();

    let run = wait_for_run_with_status(
        repository.as_ref(),
        &TaskName::new("manual"),
        RunStatus::Done,
        Duration::from_secs(5),
    )
    .await;

    // The one-shot flag was cleared before execution and the trigger was
    // recorded in the run's log trail.
    let state = repository
        .get_schedule(&TaskName::new("manual"))
        .await
        .unwrap()
        .unwrap();
    assert!(!state.run_once);
    let entries = repository.get_log_entries(run.run_id).await.unwrap();
    assert!(entries.iter().any(|e| e.message == "Manually triggered"));

    // The regular schedule is untouched: next fire is still ~tomorrow.
    assert!(state.next_run.unwrap() > Utc::now() + chrono::Duration::hours(1));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_override_then_revert() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    let task = registry
        .register(ScheduledTaskConfig::new("override", "@daily"), DoneWork)
        .await
        .unwrap();
    assert_eq!(task.active_cron_expression(), "@daily");

    // Tighten the schedule at runtime; the runner wakes and fires soon.
    task.set_override_expression(Some("@every 1s")).await.unwrap();
    assert_eq!(task.active_cron_expression(), "@every 1s");

    wait_for_run_with_status(
        repository.as_ref(),
        &TaskName::new("override"),
        RunStatus::Done,
        Duration::from_secs(5),
    )
    .await;

    // Reverting recomputes the next fire time from the default expression.
    task.set_override_expression(None).await.unwrap();
    assert_eq!(task.active_cron_expression(), "@daily");

    let state = repository
        .get_schedule(&TaskName::new("override"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.overridden_cron, None);
    assert!(state.next_run.unwrap() > Utc::now() + chrono::Duration::hours(1));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_paused_task_skips_runs_but_advances_schedule() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    let task = registry
        .register(ScheduledTaskConfig::new("paused", "@every 1s"), DoneWork)
        .await
        .unwrap();
    task.stop().await.unwrap();

    let name = TaskName::new("paused");
    let initial_next = repository
        .get_schedule(&name)
        .await
        .unwrap()
        .unwrap()
        .next_run
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;

    // No runs were recorded, yet the fire time kept moving forward.
    assert_eq!(count_runs(repository.as_ref(), &name).await, 0);
    let advanced_next = repository
        .get_schedule(&name)
        .await
        .unwrap()
        .unwrap()
        .next_run
        .unwrap();
    assert!(advanced_next > initial_next);

    // Resuming restores normal execution.
    task.start().await.unwrap();
    wait_for_run_with_status(
        repository.as_ref(),
        &name,
        RunStatus::Done,
        Duration::from_secs(5),
    )
    .await;

    registry.shutdown().await;
}
