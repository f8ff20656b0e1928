//! Common test utilities shared across integration tests.

use chrono::Utc;
use std::time::Duration;
use steward::{Repository, RunStatus, TaskName, TaskRun};

/// Wait for the task's latest run to reach an expected status, polling the
/// repository.
///
/// More reliable than fixed sleeps since scheduling latency varies. Polls
/// every 25ms and panics if the timeout is reached first.
pub async fn wait_for_run_with_status(
    repository: &dyn Repository,
    name: &TaskName,
    expected: RunStatus,
    timeout: Duration,
) -> TaskRun {
    let start = tokio::time::Instant::now();
    loop {
        if let Some(run) = repository.get_last_run(name).await.unwrap() {
            if run.status == expected {
                return run;
            }
        }
        if start.elapsed() > timeout {
            panic!(
                "timeout waiting for a {:?} run of '{}'",
                expected, name
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Number of persisted runs for a task, regardless of status.
pub async fn count_runs(repository: &dyn Repository, name: &TaskName) -> usize {
    repository
        .get_runs_between(
            name,
            Utc::now() - chrono::Duration::days(1),
            Utc::now() + chrono::Duration::days(1),
        )
        .await
        .unwrap()
        .len()
}
