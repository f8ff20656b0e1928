//! The scheduling engine: registry, per-task runners, master lock keeper
//! and the run context handed to user callbacks.

pub mod context;
pub mod handle;
pub(crate) mod lock;
pub mod registry;
pub mod runner;

use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

use crate::repository::RepositoryError;
use context::{Completion, RunContext};

/// Errors raised by user callbacks.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The work failed with a message.
    #[error("{0}")]
    Failed(String),

    /// A repository operation inside the callback failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The callback executed on every fire of a scheduled task.
///
/// A callback must finish by calling exactly one of
/// [`RunContext::done`], [`RunContext::failed`] or [`RunContext::dispatched`]
/// on the context it was given and return the [`Completion`] those produce.
/// Returning `Ok` without having recorded a terminal status on this run is a
/// contract violation; the runner then marks the run failed itself.
///
/// # Example
///
/// ```ignore
/// use steward::{Completion, RunContext, ScheduledWork, WorkError};
/// use async_trait::async_trait;
///
/// struct Sweep;
///
/// #[async_trait]
/// impl ScheduledWork for Sweep {
///     async fn run(&self, ctx: RunContext) -> Result<Completion, WorkError> {
///         ctx.log("sweeping expired sessions").await?;
///         // ... the actual work ...
///         Ok(ctx.done("swept 42 sessions").await?)
///     }
/// }
/// ```
#[async_trait]
pub trait ScheduledWork: Send + Sync {
    /// Execute one run of the task.
    async fn run(&self, ctx: RunContext) -> Result<Completion, WorkError>;
}

/// Plain async closures can be registered directly.
#[async_trait]
impl<F, Fut> ScheduledWork for F
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Completion, WorkError>> + Send + 'static,
{
    async fn run(&self, ctx: RunContext) -> Result<Completion, WorkError> {
        (self)(ctx).await
    }
}
