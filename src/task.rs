//! Task construction and the typed-to-erased bridge.
//!
//! A [`Task<T>`] is a unit of work: a functor plus the parent tasks whose
//! results it consumes, producing one result future per scheduled run.
//! Tasks are wired together bottom-up, so a task can only ever reference
//! already-constructed parents and the resulting graph is acyclic by
//! construction.
//!
//! ## Typed wiring over an erased core
//!
//! Dependency wiring is strongly typed: the [`Parents`] trait is
//! implemented for tuples of tasks (and a few other shapes), and the
//! functor passed to [`Task::new`] must accept exactly the borrowed result
//! types those parents produce. Under the hood everything is type-erased —
//! results are stored as [`Dynamic`] and tasks of different result types
//! live together in the dispatch list — with `Parents::resolve` acting as
//! the safe bridge back to concrete types. It panics only if the strictly
//! typed construction was somehow bypassed, which the compiler prevents.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TaskError;
use crate::executor::{Executor, Work};
use crate::future::{Dynamic, Slot, TaskFuture};
use crate::node::Node;

pub(crate) type RunFn = Box<dyn Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync>;

/// The type-erased core shared by every handle to one task.
pub(crate) struct TaskCore {
    pub(crate) node: Mutex<Node>,
    /// Direct parents, in declaration order. These are owning handles; the
    /// task keeps its parents alive for as long as any graph references it.
    pub(crate) parents: Vec<Arc<TaskCore>>,
    pub(crate) executor: Mutex<Option<Arc<dyn Executor>>>,
    /// Cancellation flag link, replaced by every finalize pass that reaches
    /// this task. Read at run time so closures observe the latest link.
    pub(crate) canceled: Mutex<Arc<AtomicBool>>,
    /// The current result slot; each schedule call swaps in a fresh one.
    pub(crate) slot: Mutex<Slot>,
    visited: AtomicBool,
    run: RunFn,
}

impl TaskCore {
    pub(crate) fn node_snapshot(&self) -> Node {
        self.node.lock().unwrap().clone()
    }

    /// Depth-first post-order walk: parents are yielded before the task
    /// itself, and a task reachable through multiple paths is yielded
    /// exactly once per traversal thanks to the visited mark.
    pub(crate) fn visit(self: &Arc<Self>, f: &mut dyn FnMut(&Arc<TaskCore>)) {
        if self.visited.swap(true, Ordering::SeqCst) {
            return;
        }
        for parent in &self.parents {
            parent.visit(f);
        }
        f(self);
    }

    /// Clears the visited marks left behind by [`visit`](Self::visit), so a
    /// sibling graph sharing this subgraph can run its own traversal.
    pub(crate) fn unvisit(&self) {
        if self.visited.swap(false, Ordering::SeqCst) {
            for parent in &self.parents {
                parent.unvisit();
            }
        }
    }

    /// Builds the runnable closure for one schedule call.
    ///
    /// A fresh pending slot replaces the current one immediately, so that
    /// packagers of downstream tasks (which run later in dispatch order)
    /// capture this run's future rather than a stale one. The returned
    /// closure publishes into that same slot when an executor eventually
    /// runs it.
    pub(crate) fn package(self: &Arc<Self>) -> Work {
        let parent_slots: Vec<Slot> = self
            .parents
            .iter()
            .map(|parent| parent.slot.lock().unwrap().clone())
            .collect();
        let fresh = Slot::pending();
        *self.slot.lock().unwrap() = fresh.clone();

        let core = Arc::clone(self);
        Box::new(move || {
            let outcome = core.evaluate(&parent_slots);
            fresh.publish(outcome);
        })
    }

    /// Resolves parent futures in declaration order, checks the cancel flag
    /// and invokes the functor. Failed parents short-circuit: their error
    /// becomes this task's published outcome.
    fn evaluate(&self, parent_slots: &[Slot]) -> Result<Dynamic, TaskError> {
        if self.is_canceled() {
            return Err(TaskError::Canceled(self.name()));
        }

        let mut values = Vec::with_capacity(parent_slots.len());
        for slot in parent_slots {
            values.push(slot.wait()?);
        }

        // Re-check: the flag may have been set while blocked on parents.
        if self.is_canceled() {
            return Err(TaskError::Canceled(self.name()));
        }

        (self.run)(&values).map_err(|source| TaskError::Failed(self.name(), Arc::new(source)))
    }

    fn is_canceled(&self) -> bool {
        self.canceled.lock().unwrap().load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        self.node.lock().unwrap().name.clone()
    }
}

/// A type-erased handle to a task, used wherever tasks of different result
/// types must live in one container.
#[derive(Clone)]
pub struct AnyTask(pub(crate) Arc<TaskCore>);

impl AnyTask {
    /// Snapshot of the task's metadata.
    pub fn node(&self) -> Node {
        self.0.node_snapshot()
    }
}

/// Wiring between a task and the already-built tasks it consumes.
///
/// Implemented for `()` (no parents), a single [`Task<T>`], tuples of tasks
/// up to arity twelve, and homogeneous `Vec<Task<T>>`. The functor handed
/// to [`Task::new`] receives [`Values`](Parents::Values) — borrowed parent
/// results with types checked at construction time.
pub trait Parents: Send + Sync + 'static {
    /// The borrowed parent results handed to the functor.
    type Values<'a>;

    /// Type-erased handles for the parent tasks, in declaration order.
    fn handles(&self) -> Vec<AnyTask>;

    /// Downcasts resolved parent results back to their concrete types.
    ///
    /// # Panics
    /// Panics if an output cannot be downcast, which the typed constructors
    /// rule out.
    fn resolve<'a>(&self, values: &'a [Dynamic]) -> Self::Values<'a>;
}

impl Parents for () {
    type Values<'a> = ();

    fn handles(&self) -> Vec<AnyTask> {
        vec![]
    }

    fn resolve<'a>(&self, _values: &'a [Dynamic]) -> Self::Values<'a> {}
}

impl<T: Send + Sync + 'static> Parents for Task<T> {
    type Values<'a> = &'a T;

    fn handles(&self) -> Vec<AnyTask> {
        vec![AnyTask(Arc::clone(&self.core))]
    }

    fn resolve<'a>(&self, values: &'a [Dynamic]) -> Self::Values<'a> {
        values[0]
            .downcast_ref::<T>()
            .expect("parent result type mismatch")
    }
}

impl<T: Send + Sync + 'static> Parents for Vec<Task<T>> {
    type Values<'a> = Vec<&'a T>;

    fn handles(&self) -> Vec<AnyTask> {
        self.iter()
            .map(|task| AnyTask(Arc::clone(&task.core)))
            .collect()
    }

    fn resolve<'a>(&self, values: &'a [Dynamic]) -> Self::Values<'a> {
        values
            .iter()
            .map(|value| {
                value
                    .downcast_ref::<T>()
                    .expect("parent result type mismatch")
            })
            .collect()
    }
}

macro_rules! impl_parents {
    ($($P:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($P: Send + Sync + 'static),*> Parents for ($(Task<$P>,)*) {
            type Values<'a> = ($(&'a $P,)*);

            fn handles(&self) -> Vec<AnyTask> {
                let ($($P,)*) = self;
                vec![$(AnyTask(Arc::clone(&$P.core))),*]
            }

            fn resolve<'a>(&self, values: &'a [Dynamic]) -> Self::Values<'a> {
                let mut iter = values.iter();
                ($({
                    let value = iter.next().unwrap();
                    value.downcast_ref::<$P>().unwrap_or_else(|| {
                        panic!(
                            "expected parent result of type {}",
                            std::any::type_name::<$P>(),
                        )
                    })
                },)*)
            }
        }
    };
}

impl_parents!(A);
impl_parents!(A, B);
impl_parents!(A, B, C);
impl_parents!(A, B, C, D);
impl_parents!(A, B, C, D, E);
impl_parents!(A, B, C, D, E, F);
impl_parents!(A, B, C, D, E, F, G);
impl_parents!(A, B, C, D, E, F, G, H);
impl_parents!(A, B, C, D, E, F, G, H, I);
impl_parents!(A, B, C, D, E, F, G, H, I, J);
impl_parents!(A, B, C, D, E, F, G, H, I, J, K);
impl_parents!(A, B, C, D, E, F, G, H, I, J, K, L);

/// A unit of work producing a value of type `T`, wired to the parent tasks
/// whose results it consumes.
///
/// Tasks are cheap to clone; clones share the same underlying node, functor
/// and result slot, so a task can be a parent of any number of downstream
/// tasks — including tasks in independent graphs. A task becomes part of a
/// runnable graph once a [`FinalTask`](crate::FinalTask) reachable from it
/// is constructed.
pub struct Task<T> {
    pub(crate) core: Arc<TaskCore>,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Task<T> {
    /// Full constructor. An empty name is auto-filled as `task<id>` during
    /// the finalize pass; higher priorities are dispatched first among
    /// tasks of the same level. The functor's argument types are checked
    /// against the parents' result types here, at compile time.
    pub fn new<P, F>(name: impl Into<String>, priority: usize, parents: P, functor: F) -> Self
    where
        P: Parents,
        F: for<'a> Fn(P::Values<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let handles = parents.handles();
        let level = handles
            .iter()
            .map(|handle| handle.node().level + 1)
            .max()
            .unwrap_or(0);
        let node = Node {
            id: 0,
            priority,
            level,
            name: name.into(),
            parent_count: handles.len(),
        };

        let run: RunFn = Box::new(move |values| {
            Ok(Arc::new(functor(parents.resolve(values))?) as Dynamic)
        });

        Task {
            core: Arc::new(TaskCore {
                node: Mutex::new(node),
                parents: handles.into_iter().map(|handle| handle.0).collect(),
                executor: Mutex::new(None),
                canceled: Mutex::new(Arc::new(AtomicBool::new(false))),
                slot: Mutex::new(Slot::settled(Err(TaskError::InvalidHandle))),
                visited: AtomicBool::new(false),
                run,
            }),
            _marker: PhantomData,
        }
    }

    /// Returns the handle for the result of the most recent schedule call.
    ///
    /// Safe to call concurrently with scheduling. Before the first schedule
    /// the handle resolves to [`TaskError::InvalidHandle`].
    pub fn future(&self) -> TaskFuture<T> {
        TaskFuture {
            slot: self.core.slot.lock().unwrap().clone(),
            _marker: PhantomData,
        }
    }

    /// Snapshot of this task's metadata.
    pub fn node(&self) -> Node {
        self.core.node_snapshot()
    }

    /// Assigns a task-specific executor, taking precedence over the default
    /// passed to [`FinalTask::schedule`](crate::FinalTask::schedule).
    pub fn set_executor(&self, executor: Arc<dyn Executor>) {
        *self.core.executor.lock().unwrap() = Some(executor);
    }

    /// The type-erased closure that resolves parent results and runs the
    /// work. This is the only form the functor exists in after type
    /// erasure.
    pub fn functor(&self) -> &(dyn Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync) {
        &*self.core.run
    }

    /// Type-erased handles to the direct parents, in declaration order.
    pub fn parents(&self) -> Vec<AnyTask> {
        self.core.parents.iter().cloned().map(AnyTask).collect()
    }

    /// Type-erased handle to this task.
    pub fn as_any(&self) -> AnyTask {
        AnyTask(Arc::clone(&self.core))
    }
}
