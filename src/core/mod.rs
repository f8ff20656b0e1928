//! Core domain types: identifiers, cron schedules and task configuration.

pub mod config;
pub mod schedule;
pub mod types;
