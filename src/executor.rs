//! Run strategies for dispatched task closures.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::error::WeftError;
use crate::node::Node;

/// A packaged run closure, ready for an executor to claim.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// A strategy for running dispatched task closures.
///
/// `execute` is called once per dispatched task per schedule call and must
/// eventually invoke the closure exactly once. An executor that shuts down
/// with work still queued leaves the matching futures unresolved; that
/// liveness risk sits with the executor, not the engine.
pub trait Executor: Send + Sync {
    /// Human-readable executor name, used in logs.
    fn name(&self) -> &str;

    /// Claims one closure for execution. `node` identifies the dispatched
    /// task.
    fn execute(&self, work: Work, node: &Node);
}

/// Runs each closure synchronously on the calling thread.
pub struct Sequential;

impl Executor for Sequential {
    fn name(&self) -> &str {
        "weft::sequential"
    }

    fn execute(&self, work: Work, _node: &Node) {
        work();
    }
}

/// Fixed set of worker threads draining a shared FIFO queue.
///
/// A task's run closure blocks its worker until every parent future has
/// resolved. A pool sized smaller than the graph's widest parallel fan-out
/// can therefore stall: every worker may end up blocked on parents whose
/// closures are still queued behind them. Size the pool at least as wide as
/// the graph.
///
/// Dropping the executor wakes all workers; each finishes only the closure
/// it has already dequeued, then exits. Closures still sitting in the queue
/// are discarded and their futures stay unresolved.
pub struct Parallel {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

struct Shared {
    queue: Mutex<State>,
    signal: Condvar,
}

struct State {
    jobs: VecDeque<Work>,
    shutdown: bool,
}

impl Parallel {
    /// Spawns `threads` workers. Fails with
    /// [`WeftError::InvalidParameter`] when `threads` is zero.
    pub fn new(threads: usize) -> Result<Self, WeftError> {
        if threads == 0 {
            return Err(WeftError::InvalidParameter(
                "worker thread count must be larger than zero".into(),
            ));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(State {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            signal: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("weft-worker-{i}"))
                    .spawn(move || worker(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Ok(Parallel { shared, workers })
    }
}

fn worker(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.queue.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                state = shared.signal.wait(state).unwrap();
            }
        };
        trace!("worker claimed one closure");
        job();
    }
}

impl Executor for Parallel {
    fn name(&self) -> &str {
        "weft::parallel"
    }

    fn execute(&self, work: Work, node: &Node) {
        trace!(task = %node.name, "queueing closure");
        {
            let mut state = self.shared.queue.lock().unwrap();
            state.jobs.push_back(work);
        }
        self.shared.signal.notify_one();
    }
}

impl Drop for Parallel {
    fn drop(&mut self) {
        {
            let mut state = self.shared.queue.lock().unwrap();
            state.shutdown = true;
            if !state.jobs.is_empty() {
                debug!(
                    discarded = state.jobs.len(),
                    "thread pool shut down with closures still queued"
                );
            }
        }
        self.shared.signal.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Hands closures to the global rayon pool.
///
/// The same fan-out hazard as [`Parallel`] applies: closures block rayon
/// workers while resolving parent futures.
#[cfg(feature = "rayon")]
pub struct Rayon;

#[cfg(feature = "rayon")]
impl Executor for Rayon {
    fn name(&self) -> &str {
        "weft::rayon"
    }

    fn execute(&self, work: Work, _node: &Node) {
        rayon::spawn(work);
    }
}
