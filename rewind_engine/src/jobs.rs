//! Fixed-width fork-join worker pool.
//!
//! The pool exists for exactly one access pattern: a frame boundary
//! submits a handful of short page-copy closures against a context, then
//! blocks on that context until they all finish. While blocked, the
//! submitting thread pulls queued jobs itself, so a pool of zero workers
//! still makes progress and the submitting thread is never idle while
//! work remains.
//!
//! There is no cancellation and there are no timeouts; jobs are expected
//! to run for microseconds to low milliseconds. A panic inside a job is
//! captured and re-raised from [`JobPool::wait`] on the submitting
//! thread.
//!
//! The only synchronization point is `wait`: submissions are unordered
//! with respect to each other, and a job's memory effects are visible to
//! the submitter once `wait` returns.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type JobFn = Box<dyn FnOnce() + Send + 'static>;

/// One queued unit of work, tagged with the context awaiting it.
struct QueuedJob {
    ctx: Arc<ContextInner>,
    run: JobFn,
}

/// State shared by the pool handle and its workers.
struct PoolShared {
    queue: Mutex<VecDeque<QueuedJob>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
}

/// Completion state for one fork-join scope.
struct ContextInner {
    /// Jobs submitted but not yet finished.
    pending: AtomicUsize,
    /// First captured panic payload, re-raised from `wait`.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

/// A fork-join scope: submit jobs against it, then wait on it.
///
/// Contexts are reusable; after `wait` returns the context is empty and
/// can carry the next batch.
pub struct JobContext {
    inner: Arc<ContextInner>,
}

impl JobContext {
    /// Create an empty context.
    pub fn new() -> Self {
        JobContext {
            inner: Arc::new(ContextInner {
                pending: AtomicUsize::new(0),
                panic: Mutex::new(None),
            }),
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-width worker pool with a fork-join contract.
pub struct JobPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    /// Spawn a pool with `workers` OS threads.
    ///
    /// Zero is legal: every job then runs on the thread that calls
    /// [`JobPool::wait`].
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("rewind-worker-{}", i))
                    .spawn(move || worker_main(&shared))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        JobPool {
            shared,
            workers: handles,
        }
    }

    /// Number of OS worker threads (not counting submitters).
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue `job` against `ctx`.
    ///
    /// Submissions are unordered relative to each other; only
    /// [`JobPool::wait`] synchronizes.
    pub fn submit(&self, ctx: &JobContext, job: impl FnOnce() + Send + 'static) {
        ctx.inner.pending.fetch_add(1, Ordering::AcqRel);
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(QueuedJob {
                ctx: Arc::clone(&ctx.inner),
                run: Box::new(job),
            });
        }
        self.shared.work_ready.notify_one();
    }

    /// Block until every job submitted against `ctx` has finished.
    ///
    /// The calling thread drains queued jobs (from any context) while it
    /// waits. If a job panicked, the first captured payload is re-raised
    /// here.
    pub fn wait(&self, ctx: &JobContext) {
        while ctx.inner.pending.load(Ordering::Acquire) > 0 {
            let job = self.shared.queue.lock().pop_front();
            match job {
                Some(job) => run_job(job),
                None => std::thread::yield_now(),
            }
        }
        if let Some(payload) = ctx.inner.panic.lock().take() {
            resume_unwind(payload);
        }
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.work_ready.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Run one job, capturing a panic into its context.
fn run_job(job: QueuedJob) {
    let result = catch_unwind(AssertUnwindSafe(job.run));
    if let Err(payload) = result {
        let mut slot = job.ctx.panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }
    // Release: the submitter's Acquire load in wait() must observe the
    // job's memory effects once it sees the counter drop.
    job.ctx.pending.fetch_sub(1, Ordering::AcqRel);
}

fn worker_main(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                shared.work_ready.wait(&mut queue);
            }
        };
        match job {
            Some(job) => run_job(job),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_fork_join_counting() {
        let pool = JobPool::new(3);
        let ctx = JobContext::new();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(&ctx, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait(&ctx);

        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_zero_width_pool_makes_progress() {
        let pool = JobPool::new(0);
        let ctx = JobContext::new();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(&ctx, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait(&ctx);

        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn test_context_is_reusable() {
        let pool = JobPool::new(2);
        let ctx = JobContext::new();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.submit(&ctx, move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            pool.wait(&ctx);
        }

        assert_eq!(counter.load(Ordering::Relaxed), 30);
    }

    #[test]
    fn test_panic_propagates_on_wait() {
        let pool = JobPool::new(2);
        let ctx = JobContext::new();

        pool.submit(&ctx, || panic!("job exploded"));

        let result = catch_unwind(AssertUnwindSafe(|| pool.wait(&ctx)));
        let payload = result.expect_err("wait should re-raise the job panic");
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .unwrap_or("<non-str payload>");
        assert_eq!(message, "job exploded");

        // The pool stays usable after a propagated panic.
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        pool.submit(&ctx, move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        pool.wait(&ctx);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
