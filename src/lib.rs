#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod dot;
mod error;
mod executor;
mod final_task;
mod future;
mod node;
mod pool;
mod task;

pub use dot::make_dot;
pub use error::{TaskError, WeftError};
#[cfg(feature = "rayon")]
pub use executor::Rayon;
pub use executor::{Executor, Parallel, Sequential, Work};
pub use final_task::FinalTask;
pub use future::{Dynamic, TaskFuture};
pub use node::{Edge, Node};
pub use pool::{Graph, GraphPool};
pub use task::{AnyTask, Parents, Task};

/// Creates an unnamed task with default priority. The name is filled in as
/// `task<id>` when a graph built on top of it is finalized.
pub fn make_task<T, P, F>(parents: P, functor: F) -> Task<T>
where
    T: Send + Sync + 'static,
    P: Parents,
    F: for<'a> Fn(P::Values<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Task::new(String::new(), 0, parents, functor)
}

/// Creates a named task with default priority. Use [`Task::new`] to set a
/// priority as well.
pub fn make_named_task<T, P, F>(name: impl Into<String>, parents: P, functor: F) -> Task<T>
where
    T: Send + Sync + 'static,
    P: Parents,
    F: for<'a> Fn(P::Values<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Task::new(name, 0, parents, functor)
}

/// Creates an unnamed final task, finalizing the graph reachable from its
/// parents.
pub fn make_final_task<T, P, F>(parents: P, functor: F) -> FinalTask<T>
where
    T: Send + Sync + 'static,
    P: Parents,
    F: for<'a> Fn(P::Values<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
{
    FinalTask::new(String::new(), parents, functor)
}

/// Creates a named final task, finalizing the graph reachable from its
/// parents.
pub fn make_named_final_task<T, P, F>(
    name: impl Into<String>,
    parents: P,
    functor: F,
) -> FinalTask<T>
where
    T: Send + Sync + 'static,
    P: Parents,
    F: for<'a> Fn(P::Values<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
{
    FinalTask::new(name, parents, functor)
}
