//! Graph finalization and dispatch.
//!
//! A [`FinalTask<T>`] is the sink of a task graph: constructing one walks
//! every task reachable through parent links, freezes the traversal into a
//! dispatch list and takes ownership of scheduling for the whole graph.
//! Tasks themselves stay inert; only a final task can dispatch them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::WeftError;
use crate::executor::{Executor, Work};
use crate::future::{Slot, TaskFuture};
use crate::node::{Edge, Node};
use crate::task::{Parents, Task, TaskCore};

/// One dispatchable task, in final dispatch order.
///
/// The node is a snapshot taken at finalize time. A task shared with a
/// later-built sibling graph gets fresh ids from that graph's finalize
/// pass, but this graph keeps dispatching and reporting with the snapshots
/// it took.
struct DispatchEntry {
    core: Arc<TaskCore>,
    node: Node,
}

/// The sink task of a graph, owning dispatch, cancellation and graph
/// export for every task reachable from it.
///
/// Finalization happens once, in the constructor: ids are assigned in a
/// topological order (parents before children), empty names become
/// `task<id>`, every reachable task is linked to this graph's cancellation
/// flag and the dispatch order is fixed to ascending level, then descending
/// priority, then ascending id.
///
/// Clones share the graph; canceling or scheduling through any clone
/// affects all of them.
pub struct FinalTask<T> {
    task: Task<T>,
    canceled: Arc<AtomicBool>,
    entries: Vec<DispatchEntry>,
    edges: Vec<Edge>,
}

impl<T> Clone for FinalTask<T> {
    fn clone(&self) -> Self {
        FinalTask {
            task: self.task.clone(),
            canceled: Arc::clone(&self.canceled),
            entries: self
                .entries
                .iter()
                .map(|entry| DispatchEntry {
                    core: Arc::clone(&entry.core),
                    node: entry.node.clone(),
                })
                .collect(),
            edges: self.edges.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> FinalTask<T> {
    /// Builds the sink task and finalizes the graph reachable from it.
    pub fn new<P, F>(name: impl Into<String>, parents: P, functor: F) -> Self
    where
        P: Parents,
        F: for<'a> Fn(P::Values<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let task = Task::new(name, 0, parents, functor);
        let canceled = Arc::new(AtomicBool::new(false));

        let mut order: Vec<Arc<TaskCore>> = Vec::new();
        task.core.visit(&mut |core| order.push(Arc::clone(core)));
        task.core.unvisit();

        for (id, core) in order.iter().enumerate() {
            {
                let mut node = core.node.lock().unwrap();
                node.id = id;
                if node.name.is_empty() {
                    node.name = format!("task{id}");
                }
            }
            *core.canceled.lock().unwrap() = Arc::clone(&canceled);
        }

        let mut edges = Vec::new();
        for core in &order {
            let child = core.node_snapshot();
            for parent in &core.parents {
                edges.push(Edge {
                    child: child.clone(),
                    parent: parent.node_snapshot(),
                });
            }
        }

        let mut entries: Vec<DispatchEntry> = order
            .into_iter()
            .map(|core| {
                let node = core.node_snapshot();
                DispatchEntry { core, node }
            })
            .collect();
        entries.sort_by_key(|entry| {
            (
                entry.node.level,
                std::cmp::Reverse(entry.node.priority),
                entry.node.id,
            )
        });

        FinalTask {
            task,
            canceled,
            entries,
            edges,
        }
    }

    /// Packages and dispatches every task in the graph, parents before
    /// children.
    ///
    /// Each task runs on its assigned executor if it has one, otherwise on
    /// `default`. When a task has neither, dispatch stops with
    /// [`WeftError::MissingExecutor`]; tasks ordered earlier have already
    /// been dispatched and will run, while the futures of the remaining
    /// tasks stay unresolved until the next successful schedule call.
    ///
    /// While the cancellation flag is set this is a no-op. Every call
    /// replaces the futures of all tasks in the graph; previously obtained
    /// future handles keep referring to the run they were taken from.
    pub fn schedule(&self, default: Option<&dyn Executor>) -> Result<(), WeftError> {
        if self.canceled.load(Ordering::SeqCst) {
            debug!(task = %self.node().name, "graph is canceled, nothing scheduled");
            return Ok(());
        }

        let packaged: Vec<Work> = self.entries.iter().map(|entry| entry.core.package()).collect();

        for (entry, work) in self.entries.iter().zip(packaged) {
            let assigned = entry.core.executor.lock().unwrap().clone();
            let Some(executor) = assigned.as_deref().or(default) else {
                return Err(WeftError::MissingExecutor(entry.node.name.clone()));
            };
            debug!(task = %entry.node.name, executor = executor.name(), "dispatching");
            executor.execute(work, &entry.node);
        }
        Ok(())
    }

    /// Sets or clears the graph's cancellation flag.
    ///
    /// Already running functors are not interrupted; tasks whose closures
    /// start while the flag is set resolve to
    /// [`TaskError::Canceled`](crate::TaskError::Canceled) without running
    /// their functor.
    pub fn set_cancel(&self, enabled: bool) {
        self.canceled.store(enabled, Ordering::SeqCst);
    }

    /// The edges of the finalized graph, for export via
    /// [`make_dot`](crate::make_dot). Empty for a single-task graph.
    pub fn graph(&self) -> &[Edge] {
        &self.edges
    }

    /// Result handle for the sink task's most recent schedule call.
    pub fn future(&self) -> TaskFuture<T> {
        self.task.future()
    }

    /// Snapshot of the sink task's metadata.
    pub fn node(&self) -> Node {
        self.task.node()
    }

    /// Assigns a sink-task-specific executor; see
    /// [`Task::set_executor`](crate::Task::set_executor).
    pub fn set_executor(&self, executor: Arc<dyn Executor>) {
        self.task.set_executor(executor);
    }

    /// The sink viewed as a plain task, e.g. for use as a parent of
    /// another graph.
    pub fn as_task(&self) -> Task<T> {
        self.task.clone()
    }

    /// Current result slot of the sink task, used by pools to tell a new
    /// run from the one they last observed.
    pub(crate) fn result_slot(&self) -> Slot {
        self.task.core.slot.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::executor::Sequential;
    use crate::{make_final_task, make_named_final_task, make_named_task, make_task};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Holds dispatched closures until told to run them.
    struct Deferred {
        held: Mutex<Vec<Work>>,
    }

    impl Deferred {
        fn new() -> Self {
            Deferred {
                held: Mutex::new(Vec::new()),
            }
        }

        fn run_all(&self) {
            let held: Vec<Work> = self.held.lock().unwrap().drain(..).collect();
            for work in held {
                work();
            }
        }
    }

    impl Executor for Deferred {
        fn name(&self) -> &str {
            "deferred"
        }

        fn execute(&self, work: Work, _node: &Node) {
            self.held.lock().unwrap().push(work);
        }
    }

    /// Runs inline and records dispatch order by task name.
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                log: Mutex::new(Vec::new()),
            }
        }
    }

    impl Executor for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn execute(&self, work: Work, node: &Node) {
            self.log.lock().unwrap().push(node.name.clone());
            work();
        }
    }

    #[test]
    fn finalize_assigns_topological_ids_and_names() {
        let a = make_task((), |_| Ok(1));
        let b = make_task(a.clone(), |x| Ok(x + 1));
        let c = make_task(a.clone(), |x| Ok(x + 2));
        let sink = make_named_final_task("sink", (b.clone(), c.clone()), |(x, y)| Ok(x + y));

        assert_eq!(a.node().id, 0);
        assert_eq!(b.node().id, 1);
        assert_eq!(c.node().id, 2);
        assert_eq!(sink.node().id, 3);

        assert_eq!(a.node().name, "task0");
        assert_eq!(b.node().name, "task1");
        assert_eq!(sink.node().name, "sink");

        assert_eq!(sink.node().level, 2);
        assert_eq!(sink.graph().len(), 4);
    }

    #[test]
    fn computes_through_a_diamond() {
        let a = make_task((), |_| Ok(2));
        let b = make_task(a.clone(), |x| Ok(x + 3));
        let c = make_task(a, |x| Ok(x * 10));
        let sink = make_final_task((b, c), |(x, y)| Ok(x + y));

        sink.schedule(Some(&Sequential)).unwrap();
        assert_eq!(*sink.future().get().unwrap(), 25);
    }

    #[test]
    fn dispatches_by_descending_priority_within_a_level() {
        let root = make_named_task("root", (), |_| Ok(0));
        let low = Task::new("low", 1, root.clone(), |x: &i32| Ok(x + 1));
        let high = Task::new("high", 10, root.clone(), |x: &i32| Ok(x + 2));
        let mid = Task::new("mid", 5, root, |x: &i32| Ok(x + 3));
        let sink = make_named_final_task("sink", (low, high, mid), |(a, b, c)| Ok(a + b + c));

        let recorder = Recorder::new();
        sink.schedule(Some(&recorder)).unwrap();

        let log = recorder.log.lock().unwrap();
        assert_eq!(*log, vec!["root", "high", "mid", "low", "sink"]);
    }

    #[test]
    fn repeated_schedules_produce_fresh_futures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sink = make_final_task((), move |_| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });

        sink.schedule(Some(&Sequential)).unwrap();
        let first = sink.future();
        sink.schedule(Some(&Sequential)).unwrap();
        let second = sink.future();

        assert_eq!(*first.get().unwrap(), 0);
        assert_eq!(*second.get().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_between_schedule_and_run_yields_canceled_errors() {
        let a = make_named_task("a", (), |_| Ok(1));
        let sink = make_named_final_task("sink", a.clone(), |x| Ok(x + 1));

        let deferred = Deferred::new();
        sink.schedule(Some(&deferred)).unwrap();
        sink.set_cancel(true);
        deferred.run_all();

        assert!(matches!(
            a.future().get(),
            Err(TaskError::Canceled(name)) if name == "a"
        ));
        assert!(matches!(
            sink.future().get(),
            Err(TaskError::Canceled(name)) if name == "sink"
        ));
    }

    #[test]
    fn schedule_while_canceled_is_a_no_op() {
        let sink = make_final_task((), |_| Ok(1));
        sink.set_cancel(true);
        sink.schedule(Some(&Sequential)).unwrap();

        assert!(matches!(
            sink.future().get(),
            Err(TaskError::InvalidHandle)
        ));

        sink.set_cancel(false);
        sink.schedule(Some(&Sequential)).unwrap();
        assert_eq!(*sink.future().get().unwrap(), 1);
    }

    #[test]
    fn missing_executor_stops_dispatch() {
        let parent = make_named_task("p", (), |_| Ok(1));
        parent.set_executor(Arc::new(Sequential));
        let sink = make_named_final_task("c", parent.clone(), |x| Ok(x + 1));

        let err = sink.schedule(None).unwrap_err();
        assert!(matches!(err, WeftError::MissingExecutor(name) if name == "c"));

        // The parent was dispatched before the error, the sink never was.
        assert_eq!(*parent.future().get().unwrap(), 1);
        assert!(!sink.future().is_ready());

        // A later call with a default executor recovers fully.
        sink.schedule(Some(&Sequential)).unwrap();
        assert_eq!(*sink.future().get().unwrap(), 2);
    }

    #[test]
    fn functor_errors_propagate_to_consumers() {
        let boom: Task<i32> = make_named_task("boom", (), |_| anyhow::bail!("kaput"));
        let sink = make_named_final_task("sink", boom.clone(), |x| Ok(x + 1));

        sink.schedule(Some(&Sequential)).unwrap();

        assert!(matches!(
            boom.future().get(),
            Err(TaskError::Failed(name, _)) if name == "boom"
        ));
        // The sink never runs its functor; it republishes the parent error.
        assert!(matches!(
            sink.future().get(),
            Err(TaskError::Failed(name, _)) if name == "boom"
        ));
    }

    #[test]
    fn sibling_graphs_can_share_a_subgraph() {
        let shared = make_task((), |_| Ok(10));
        let left = make_final_task(shared.clone(), |x| Ok(x + 1));
        let right = make_final_task(shared, |x| Ok(x * 2));

        left.schedule(Some(&Sequential)).unwrap();
        right.schedule(Some(&Sequential)).unwrap();

        assert_eq!(*left.future().get().unwrap(), 11);
        assert_eq!(*right.future().get().unwrap(), 20);
    }

    #[test]
    fn sink_can_feed_another_graph() {
        let inner = make_final_task((), |_| Ok(6));
        let outer = make_final_task(inner.as_task(), |x| Ok(x * 7));

        outer.schedule(Some(&Sequential)).unwrap();
        assert_eq!(*outer.future().get().unwrap(), 42);
    }
}
