//! Scheduled execution on a single master node.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steward::{
    Completion, InMemoryRepository, Registry, Repository, RunContext, RunStatus,
    ScheduledTaskConfig, ScheduledWork, TaskName, WorkError,
};

use crate::common::{count_runs, wait_for_run_with_status};

/// Work that completes successfully with a fixed message.
struct DoneWork {
    msg: &'static str,
}

#[async_trait]
impl ScheduledWork for DoneWork {
    async fn run(&self, ctx: RunContext) -> Result<Completion, WorkError> {
        Ok(ctx.done(self.msg).await?)
    }
}

/// Work that sleeps longer than its fire interval and records how many
/// invocations overlap.
struct SlowWork {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl ScheduledWork for SlowWork {
    async fn run(&self, ctx: RunContext) -> Result<Completion, WorkError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        // Longer than the fire interval on purpose.
        tokio::time::sleep(Duration::from_millis(1300)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ctx.done("slept").await?)
    }
}

/// Work that always fails.
struct FailWork;

#[async_trait]
impl ScheduledWork for FailWork {
    async fn run(&self, _ctx: RunContext) -> Result<Completion, WorkError> {
        Err(WorkError::Failed("always broken".to_string()))
    }
}

#[tokio::test]
async fn test_single_node_fires_on_schedule() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    // The first acquisition attempt happens during startup.
    assert!(registry.has_master_lock());

    let task = registry
        .register(
            ScheduledTaskConfig::new("ticker", "@every 1s"),
            DoneWork { msg: "tick" },
        )
        .await
        .unwrap();

    let run = wait_for_run_with_status(
        repository.as_ref(),
        &TaskName::new("ticker"),
        RunStatus::Done,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(run.status_msg, "tick");
    assert_eq!(run.hostname, registry.node_name());
    assert!(run.status_time >= run.run_start);

    // The schedule row moved on to the next fire time.
    let state = repository
        .get_schedule(&TaskName::new("ticker"))
        .await
        .unwrap()
        .unwrap();
    assert!(state.next_run.unwrap() > run.run_start);
    assert_eq!(task.next_run(), state.next_run);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_runs_for_one_task_never_overlap() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    registry
        .register(
            ScheduledTaskConfig::new("slow", "@every 1s"),
            SlowWork {
                in_flight: Arc::clone(&in_flight),
                peak: Arc::clone(&peak),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    registry.shutdown().await;

    let name = TaskName::new("slow");
    assert!(count_runs(repository.as_ref(), &name).await >= 2);
    // A new cycle never starts before the previous one completed.
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failing_callback_does_not_stop_the_loop() {
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Registry::start(Arc::clone(&repository)).await;

    registry
        .register(ScheduledTaskConfig::new("flaky", "@every 1s"), FailWork)
        .await
        .unwrap();

    let run = wait_for_run_with_status(
        repository.as_ref(),
        &TaskName::new("flaky"),
        RunStatus::Failed,
        Duration::from_secs(5),
    )
    .await;
    assert!(!run.status_stacktrace.unwrap().is_empty());

    // The loop keeps firing on schedule after the failure.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    registry.shutdown().await;

    let runs = count_runs(repository.as_ref(), &TaskName::new("flaky")).await;
    assert!(runs >= 2, "expected the loop to continue, got {} runs", runs);
}
