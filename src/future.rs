//! Blocking, shareable result slots.
//!
//! Every task owns one current [`Slot`]; each schedule call replaces it with
//! a fresh pending slot during packaging, and the run closure publishes the
//! outcome into that same slot when it eventually executes. All clones of a
//! slot observe the same result. The public face is [`TaskFuture<T>`], which
//! downcasts the type-erased value back to `Arc<T>` on retrieval.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::TaskError;

/// A type-erased task result. Tasks of different result types are stored
/// together at runtime; the typed constructors guarantee that downcasting
/// back to the concrete type cannot fail.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Shared slot a task publishes its outcome into. Cloning hands out another
/// reference to the same slot.
#[derive(Clone)]
pub(crate) struct Slot {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<Option<Result<Dynamic, TaskError>>>,
    ready: Condvar,
}

impl Slot {
    /// A slot with no outcome yet; `wait` blocks until one is published.
    pub(crate) fn pending() -> Self {
        Self::with_state(None)
    }

    /// A slot that already carries an outcome.
    pub(crate) fn settled(result: Result<Dynamic, TaskError>) -> Self {
        Self::with_state(Some(result))
    }

    fn with_state(state: Option<Result<Dynamic, TaskError>>) -> Self {
        Slot {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                ready: Condvar::new(),
            }),
        }
    }

    /// Publishes the outcome and wakes every blocked waiter.
    pub(crate) fn publish(&self, result: Result<Dynamic, TaskError>) {
        let mut state = self.inner.state.lock().unwrap();
        *state = Some(result);
        self.inner.ready.notify_all();
    }

    /// Blocks the calling thread until an outcome has been published.
    pub(crate) fn wait(&self) -> Result<Dynamic, TaskError> {
        let mut state = self.inner.state.lock().unwrap();
        while state.is_none() {
            state = self.inner.ready.wait(state).unwrap();
        }
        state.as_ref().unwrap().clone()
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.inner.state.lock().unwrap().is_some()
    }

    /// Whether two handles refer to the same underlying slot.
    pub(crate) fn same_slot(a: &Slot, b: &Slot) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// A handle to the result of one scheduled run of a task.
///
/// Retrieving the value blocks the calling thread until the task has
/// published its outcome; every holder of a clone observes the same result.
/// The handle is tied to the schedule call that was current when it was
/// obtained — re-scheduling publishes into a new slot, so call
/// [`Task::future`](crate::Task::future) again after each schedule.
pub struct TaskFuture<T> {
    pub(crate) slot: Slot,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        TaskFuture {
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> TaskFuture<T> {
    /// Blocks until the task has run, then returns its result.
    ///
    /// # Panics
    /// Panics if the published value is not a `T`, which the typed
    /// constructors rule out.
    pub fn get(&self) -> Result<Arc<T>, TaskError> {
        let value = self.slot.wait()?;
        Ok(value
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("task result type mismatch")))
    }

    /// Whether an outcome has already been published.
    pub fn is_ready(&self) -> bool {
        self.slot.is_resolved()
    }
}
