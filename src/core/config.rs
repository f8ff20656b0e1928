//! Per-task configuration: identity, schedule, severity and history retention.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::TaskName;

/// How important a scheduled task is to the service that registered it.
///
/// Diagnostic metadata only; the scheduler treats every task the same.
/// Monitoring collaborators read this to decide how loudly to alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    /// The service is considered down while this task is failing.
    MissionCritical,
    /// Failures require prompt attention but the service still works.
    Vital,
    /// Failures should be looked at during office hours.
    Important,
    /// Failures can wait.
    Minor,
}

/// Whether a failing task repairs itself on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recovery {
    /// The next successful run also covers the work the failed run missed.
    SelfHealing,
    /// An operator has to step in after a failure.
    ManualIntervention,
}

/// Rules for pruning persisted run history.
///
/// Applied by the runner after every completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Delete runs older than this. `None` keeps runs forever.
    pub max_age: Option<Duration>,
    /// Keep at most this many runs per task. `None` means unlimited.
    pub max_runs: Option<usize>,
    /// Delete a run's log entries together with the run itself.
    pub delete_logs: bool,
}

impl RetentionPolicy {
    const DEFAULT_MAX_AGE_DAYS: u64 = 365;

    /// Keep runs for the given number of days.
    pub fn keep_days(days: u64) -> Self {
        Self {
            max_age: Some(Duration::from_secs(days * 24 * 60 * 60)),
            ..Self::default()
        }
    }

    /// Set the maximum number of retained runs.
    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Keep log entries even when their run is deleted.
    pub fn with_logs_retained(mut self) -> Self {
        self.delete_logs = false;
        self
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(
                Self::DEFAULT_MAX_AGE_DAYS * 24 * 60 * 60,
            )),
            max_runs: None,
            delete_logs: true,
        }
    }
}

/// Immutable configuration for one registered scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTaskConfig {
    name: TaskName,
    cron_expression: String,
    max_expected_minutes_to_run: u32,
    criticality: Criticality,
    recovery: Recovery,
    retention_policy: RetentionPolicy,
}

impl ScheduledTaskConfig {
    /// Create a config with the given name and default cron expression.
    pub fn new(name: impl Into<TaskName>, cron_expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            max_expected_minutes_to_run: 0,
            criticality: Criticality::Important,
            recovery: Recovery::SelfHealing,
            retention_policy: RetentionPolicy::default(),
        }
    }

    /// Set the expected upper bound on run time, in minutes.
    ///
    /// Zero means no expectation; the task is then never reported overdue.
    pub fn with_max_expected_minutes_to_run(mut self, minutes: u32) -> Self {
        self.max_expected_minutes_to_run = minutes;
        self
    }

    /// Set the criticality.
    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Set the recovery mode.
    pub fn with_recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    /// Set the retention policy.
    pub fn with_retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = policy;
        self
    }

    /// The task's unique name.
    pub fn name(&self) -> &TaskName {
        &self.name
    }

    /// The default cron expression.
    pub fn cron_expression(&self) -> &str {
        &self.cron_expression
    }

    /// Expected upper bound on run time in minutes (0 = no expectation).
    pub fn max_expected_minutes_to_run(&self) -> u32 {
        self.max_expected_minutes_to_run
    }

    /// The configured criticality.
    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    /// The configured recovery mode.
    pub fn recovery(&self) -> Recovery {
        self.recovery
    }

    /// The configured retention policy.
    pub fn retention_policy(&self) -> &RetentionPolicy {
        &self.retention_policy
    }
}
