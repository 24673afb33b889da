use std::sync::Arc;

use thiserror::Error;

/// Structural failures raised synchronously by construction and scheduling
/// calls.
#[derive(Debug, Error)]
pub enum WeftError {
    /// A constructor was given an out-of-range size, e.g. a zero worker
    /// thread count or pool bounds with `minimum > maximum`.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// During `schedule`, a task resolved to no executor: it has none
    /// assigned and no default was supplied. Aborts the remaining dispatch
    /// loop, leaving later-ordered tasks un-dispatched for that call.
    #[error("no executor available for task '{0}'")]
    MissingExecutor(String),
}

/// Per-task runtime failures, carried inside task futures.
///
/// Clone because a single future may be retrieved by any number of
/// downstream tasks; functor errors are shared behind an `Arc` for the same
/// reason.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task's run closure executed after the graph's cancellation flag
    /// was set. Propagates transitively to every task that consumes this
    /// result.
    #[error("task '{0}' is canceled")]
    Canceled(String),

    /// The result handle belongs to a task that has never been scheduled,
    /// so there is no computation to wait for.
    #[error("no result has been scheduled for this task")]
    InvalidHandle,

    /// The task's functor returned an error.
    #[error("task '{0}' failed: {1}")]
    Failed(String, Arc<anyhow::Error>),
}
