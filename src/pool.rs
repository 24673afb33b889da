//! Elastic reuse of pre-built graph instances.
//!
//! Building a graph has a real cost: every task allocates, and finalization
//! walks the whole structure. A [`GraphPool`] amortizes that over a stream
//! of incoming work by keeping a bounded collection of independently
//! constructed instances and handing out whichever one is currently idle.
//!
//! The pool's own bookkeeping is not synchronized; callers serialize access
//! to one pool instance, while the graphs handed out run concurrently.

use std::sync::Arc;

use tracing::debug;

use crate::error::WeftError;
use crate::final_task::FinalTask;
use crate::future::Slot;

/// A graph type the pool can manage.
///
/// The pool only ever asks for the terminal task, and only to probe whether
/// the graph's latest run has finished; the rest of the graph's structure
/// is the implementor's business.
pub trait Graph {
    /// Result type of the terminal task.
    type Output: Send + Sync + 'static;

    /// The sink task of this graph instance.
    fn final_task(&self) -> &FinalTask<Self::Output>;
}

struct Entry<G> {
    graph: Arc<G>,
    /// The terminal result slot observed when this entry was last handed
    /// out, or `None` if it never was.
    claimed: Option<Slot>,
}

impl<G: Graph> Entry<G> {
    fn fresh(graph: G) -> Self {
        Entry {
            graph: Arc::new(graph),
            claimed: None,
        }
    }

    /// A claimed entry stays busy until the caller has scheduled the graph
    /// again (which installs a fresh result slot) and that newer run has
    /// resolved.
    fn is_idle(&self) -> bool {
        match &self.claimed {
            None => true,
            Some(seen) => {
                let current = self.graph.final_task().result_slot();
                !Slot::same_slot(&current, seen) && current.is_resolved()
            }
        }
    }

    fn claim(&mut self) -> Arc<G> {
        self.claimed = Some(self.graph.final_task().result_slot());
        Arc::clone(&self.graph)
    }
}

/// A bounded, elastically sized collection of graph instances.
///
/// The pool starts at `minimum` instances, grows one instance at a time as
/// demand exceeds the idle supply, and never exceeds `maximum`. Instances
/// are built by the injected factory and are expected to be structurally
/// identical, differing only in the data fed to them per run.
pub struct GraphPool<G> {
    factory: Box<dyn FnMut() -> G + Send>,
    entries: Vec<Entry<G>>,
    minimum: usize,
    maximum: usize,
}

impl<G: Graph> GraphPool<G> {
    /// Builds the pool and pre-fills it with `minimum` idle instances.
    ///
    /// Fails with [`WeftError::InvalidParameter`] unless
    /// `1 <= minimum <= maximum`.
    pub fn new(
        factory: impl FnMut() -> G + Send + 'static,
        minimum: usize,
        maximum: usize,
    ) -> Result<Self, WeftError> {
        if minimum < 1 {
            return Err(WeftError::InvalidParameter(
                "pool minimum size must be at least one".into(),
            ));
        }
        if minimum > maximum {
            return Err(WeftError::InvalidParameter(format!(
                "pool minimum size {minimum} exceeds maximum size {maximum}"
            )));
        }

        let mut pool = GraphPool {
            factory: Box::new(factory),
            entries: Vec::with_capacity(minimum),
            minimum,
            maximum,
        };
        for _ in 0..minimum {
            let graph = (pool.factory)();
            pool.entries.push(Entry::fresh(graph));
        }
        Ok(pool)
    }

    /// Hands out an idle graph, marking it busy.
    ///
    /// When every instance is busy the pool grows by one, up to `maximum`;
    /// past that it returns `None` and the caller must wait or retry. The
    /// returned graph counts as busy until it has been scheduled again and
    /// that run's terminal future has resolved.
    pub fn next_idle_graph(&mut self) -> Option<Arc<G>> {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.is_idle()) {
            return Some(entry.claim());
        }

        if self.entries.len() < self.maximum {
            debug!(size = self.entries.len() + 1, "pool growing by one instance");
            let graph = (self.factory)();
            let mut entry = Entry::fresh(graph);
            let claimed = entry.claim();
            self.entries.push(entry);
            return Some(claimed);
        }

        None
    }

    /// Resizes the pool towards `target`, clamped into
    /// `[minimum, maximum]`.
    ///
    /// Growing adds idle instances. Shrinking removes idle instances only;
    /// busy ones are kept, so the size may stay above `target` until their
    /// runs finish and a later `resize` call reclaims them.
    pub fn resize(&mut self, target: usize) {
        let target = target.clamp(self.minimum, self.maximum);

        while self.entries.len() < target {
            let graph = (self.factory)();
            self.entries.push(Entry::fresh(graph));
        }

        let mut excess = self.entries.len().saturating_sub(target);
        if excess > 0 {
            self.entries.retain(|entry| {
                if excess > 0 && entry.is_idle() {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Current number of instances, busy ones included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Number of instances available for the next claim.
    pub fn idle_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_idle()).count()
    }

    /// Number of claimed instances whose latest run has not finished.
    pub fn busy_count(&self) -> usize {
        self.entries.len() - self.idle_count()
    }

    pub fn minimum_size(&self) -> usize {
        self.minimum
    }

    pub fn maximum_size(&self) -> usize {
        self.maximum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Sequential;
    use crate::make_final_task;

    struct Doubler {
        root: FinalTask<i32>,
    }

    impl Doubler {
        fn new() -> Self {
            Doubler {
                root: make_final_task((), |_| Ok(21 * 2)),
            }
        }
    }

    impl Graph for Doubler {
        type Output = i32;

        fn final_task(&self) -> &FinalTask<i32> {
            &self.root
        }
    }

    fn pool(minimum: usize, maximum: usize) -> GraphPool<Doubler> {
        GraphPool::new(Doubler::new, minimum, maximum).unwrap()
    }

    fn run(graph: &Doubler) {
        graph.root.schedule(Some(&Sequential)).unwrap();
        assert_eq!(*graph.root.future().get().unwrap(), 42);
    }

    #[test]
    fn starts_at_minimum_size_all_idle() {
        let pool = pool(2, 4);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.minimum_size(), 2);
        assert_eq!(pool.maximum_size(), 4);
    }

    #[test]
    fn rejects_invalid_bounds() {
        assert!(matches!(
            GraphPool::new(Doubler::new, 0, 4),
            Err(WeftError::InvalidParameter(_))
        ));
        assert!(matches!(
            GraphPool::new(Doubler::new, 3, 2),
            Err(WeftError::InvalidParameter(_))
        ));
    }

    #[test]
    fn claiming_marks_entries_busy() {
        let mut pool = pool(2, 4);
        let first = pool.next_idle_graph().unwrap();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.busy_count(), 1);

        let _second = pool.next_idle_graph().unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.busy_count(), 2);
        drop(first);
    }

    #[test]
    fn grows_one_at_a_time_up_to_maximum() {
        let mut pool = pool(1, 3);
        let mut claimed = Vec::new();
        for expected_size in 1..=3 {
            claimed.push(pool.next_idle_graph().unwrap());
            assert_eq!(pool.size(), expected_size);
        }
        assert!(pool.next_idle_graph().is_none());
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.busy_count(), 3);
    }

    #[test]
    fn finished_graphs_become_idle_again() {
        let mut pool = pool(1, 1);
        let graph = pool.next_idle_graph().unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.next_idle_graph().is_none());

        run(&graph);
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.next_idle_graph().is_some());
    }

    #[test]
    fn resize_grows_with_idle_entries() {
        let mut pool = pool(1, 8);
        pool.resize(5);
        assert_eq!(pool.size(), 5);
        assert_eq!(pool.idle_count(), 5);
    }

    #[test]
    fn resize_clamps_to_bounds() {
        let mut pool = pool(2, 4);
        pool.resize(100);
        assert_eq!(pool.size(), 4);
        pool.resize(0);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn shrink_keeps_busy_entries_until_they_finish() {
        let mut pool = pool(1, 4);
        let claimed: Vec<_> = (0..4).map(|_| pool.next_idle_graph().unwrap()).collect();
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.busy_count(), 4);

        // Nothing is idle, so nothing can be removed yet.
        pool.resize(2);
        assert_eq!(pool.size(), 4);

        for graph in &claimed {
            run(graph);
        }
        assert_eq!(pool.idle_count(), 4);

        // Now the excess is reclaimable.
        pool.resize(2);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
    }
}
