use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::chunk::{ChunkPlan, ChunkRange};
use crate::error::BlobError;

/// Controls how the chunks of one tensor are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Encode every chunk on the calling thread.
    Inline,
    /// Encode on a local pool of `n` worker threads.
    Pool(usize),
}

impl ExecutionStrategy {
    /// Picks the strategy for a tensor of `numel` elements.
    ///
    /// Tensors that fit in a single chunk, and configurations allowing at most
    /// one worker, run inline to avoid thread start-up costs.
    pub fn choose(numel: usize, plan: &ChunkPlan, max_threads: usize) -> Self {
        if numel > plan.chunk_size() && max_threads > 1 {
            ExecutionStrategy::Pool(max_threads.min(plan.len()))
        } else {
            ExecutionStrategy::Inline
        }
    }
}

/// A FIFO of chunk starts shared between one producer and many workers.
///
/// Workers block in [`ChunkQueue::pop`] until a job arrives or the producer
/// calls [`ChunkQueue::close`].
#[derive(Debug, Default)]
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<usize>,
    closed: bool,
}

impl ChunkQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // a worker panic never leaves the queue half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueues a chunk start.
    pub fn push(&self, chunk_begin: usize) {
        self.lock().jobs.push_back(chunk_begin);
        self.ready.notify_one();
    }

    /// Signals that no more jobs will be pushed.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Pops the next chunk start, blocking while the queue is empty but open.
    ///
    /// Returns `None` once the queue is empty and closed.
    pub fn pop(&self) -> Option<usize> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Runs `job` once per planned chunk, following `strategy`.
///
/// With [`ExecutionStrategy::Pool`] the call builds a local pool of `n`
/// threads and starts one worker on each. Chunk starts are pushed from the
/// calling thread, which then blocks until the workers have drained the
/// queue. The first error stops the remaining workers from taking new chunks
/// and is returned once every worker has exited.
///
/// # Errors
///
/// Returns the first error produced by `job`, or [`BlobError::ThreadPool`]
/// if the pool cannot be built.
pub fn run_chunked<F>(strategy: ExecutionStrategy, plan: &ChunkPlan, job: F) -> Result<(), BlobError>
where
    F: Fn(ChunkRange) -> Result<(), BlobError> + Sync,
{
    let workers = match strategy {
        ExecutionStrategy::Inline | ExecutionStrategy::Pool(0 | 1) => {
            return plan.iter().try_for_each(|chunk| job(*chunk));
        }
        ExecutionStrategy::Pool(n) => n,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("tensorblob-serializer-{i}"))
        .build()
        .map_err(|e| BlobError::ThreadPool(e.to_string()))?;

    let queue = ChunkQueue::new();
    let aborted = AtomicBool::new(false);
    let first_error: Mutex<Option<BlobError>> = Mutex::new(None);

    let worker = || {
        while let Some(begin) = queue.pop() {
            if aborted.load(Ordering::Acquire) {
                continue;
            }
            let Some(chunk) = plan.chunk_at(begin) else {
                continue;
            };
            if let Err(e) = job(chunk) {
                aborted.store(true, Ordering::Release);
                let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
                slot.get_or_insert(e);
            }
        }
    };

    // the producer stays on the calling thread so all `workers` drain the queue
    pool.in_place_scope(|s| {
        for _ in 0..workers {
            s.spawn(|_| worker());
        }
        for chunk in plan.iter() {
            log::trace!("Starting a chunk at {}", chunk.begin);
            queue.push(chunk.begin);
        }
        queue.close();
    });

    match first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkSize;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_queue_drains_after_close() {
        let queue = ChunkQueue::new();
        queue.push(0);
        queue.push(10);
        queue.close();
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(10));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_wakes_blocked_workers() {
        let queue = ChunkQueue::new();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| std::iter::from_fn(|| queue.pop()).count()))
                .collect();
            for i in 0..20 {
                queue.push(i);
            }
            queue.close();
            let total: usize = handles.into_iter().map(|h| h.join().unwrap_or(0)).sum();
            assert_eq!(total, 20);
        });
    }

    #[test]
    fn test_choose_strategy() {
        let plan = ChunkPlan::new(10, ChunkSize::Elements(4), 100);
        assert_eq!(ExecutionStrategy::choose(10, &plan, 16), ExecutionStrategy::Pool(3));
        assert_eq!(ExecutionStrategy::choose(10, &plan, 1), ExecutionStrategy::Inline);
        let plan = ChunkPlan::new(4, ChunkSize::Elements(4), 100);
        assert_eq!(ExecutionStrategy::choose(4, &plan, 16), ExecutionStrategy::Inline);
    }

    #[test]
    fn test_run_chunked_pool_visits_every_chunk() -> Result<(), BlobError> {
        let plan = ChunkPlan::new(103, ChunkSize::Elements(10), 100);
        let seen = Mutex::new(HashSet::new());
        run_chunked(ExecutionStrategy::Pool(4), &plan, |chunk| {
            seen.lock().unwrap().insert((chunk.begin, chunk.end));
            Ok(())
        })?;
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 11);
        assert!(seen.contains(&(100, 103)));
        Ok(())
    }

    #[test]
    fn test_run_chunked_uses_every_pool_thread() -> Result<(), BlobError> {
        let workers = 4;
        let plan = ChunkPlan::new(40, ChunkSize::Elements(10), 100);
        let caller = std::thread::current().id();
        // every job waits for the others, so this only returns if all workers run at once
        let barrier = std::sync::Barrier::new(workers);
        let names = Mutex::new(HashSet::new());
        run_chunked(ExecutionStrategy::Pool(workers), &plan, |_| {
            let current = std::thread::current();
            assert_ne!(current.id(), caller);
            names.lock().unwrap().insert(current.name().unwrap_or_default().to_string());
            barrier.wait();
            Ok(())
        })?;
        let names = names.into_inner().unwrap();
        assert_eq!(names.len(), workers);
        assert!(names.iter().all(|n| n.starts_with("tensorblob-serializer-")));
        Ok(())
    }

    #[test]
    fn test_run_chunked_inline_in_order() -> Result<(), BlobError> {
        let plan = ChunkPlan::new(7, ChunkSize::Elements(2), 100);
        let order = Mutex::new(Vec::new());
        run_chunked(ExecutionStrategy::Inline, &plan, |chunk| {
            order.lock().unwrap().push(chunk.index);
            Ok(())
        })?;
        assert_eq!(order.into_inner().unwrap(), vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_run_chunked_propagates_error() {
        let plan = ChunkPlan::new(50, ChunkSize::Elements(5), 100);
        let calls = AtomicUsize::new(0);
        let res = run_chunked(ExecutionStrategy::Pool(3), &plan, |chunk| {
            calls.fetch_add(1, Ordering::SeqCst);
            if chunk.index == 2 {
                Err(BlobError::invalid_chunk(chunk.begin, chunk.end, 0))
            } else {
                Ok(())
            }
        });
        assert!(matches!(res, Err(BlobError::InvalidChunk { begin: 10, .. })));
        assert!(calls.load(Ordering::SeqCst) <= 10);
    }
}
