//! Shared worker pool for I/O-bound feed work (discovery, thumbnail decode,
//! history queries).
//!
//! Work-stealing deques: submitted jobs go to a global injector, each worker
//! drains its own deque first, then the injector, then steals from peers.
//! The presentation thread never runs jobs itself.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{error, trace, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default pool size: 3/4 of the cores, at least 2.
pub fn default_thread_count() -> usize {
    (num_cpus::get() * 3 / 4).max(2)
}

/// Worker pool with work-stealing.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4);
/// let cache = Arc::clone(&cache);
/// workers.execute(move || {
///     cache.get(&handle);
/// });
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    /// Submitted but not finished
    pending: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(Worker::stealer).collect();
        let mut handles = Vec::with_capacity(num_threads);

        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let pending = Arc::clone(&pending);
            let stealers = stealers.clone();

            let spawned = thread::Builder::new()
                .name(format!("reels-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    loop {
                        let job = local
                            .pop()
                            .or_else(|| injector.steal_batch_and_pop(&local).success())
                            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

                        match job {
                            Some(job) => {
                                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                    error!("Worker {}: job panicked", worker_id);
                                }
                                pending.fetch_sub(1, Ordering::AcqRel);
                            }
                            None if shutdown.load(Ordering::Relaxed) => break,
                            // Idle: short sleep instead of spinning
                            None => thread::sleep(Duration::from_millis(1)),
                        }
                    }
                    trace!("Worker {} stopped", worker_id);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        if handles.is_empty() {
            warn!("No worker threads available, jobs will run inline");
        }
        trace!("Workers initialized: {} threads (work-stealing)", handles.len());

        Self {
            injector,
            handles,
            pending,
            shutdown,
        }
    }

    /// Run closure on a worker thread. Fire-and-forget.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.handles.is_empty() {
            f();
            return;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(f));
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Jobs submitted and not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Block until all submitted jobs finished or `timeout` elapsed.
    ///
    /// Returns true if the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads, {} pending)...", num_threads, self.pending());

        self.shutdown.store(true, Ordering::SeqCst);

        // Queued jobs are drained first; give up waiting after 500ms total
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped", num_threads);
    }
}
