//! The global compute task pool and completion handles.
//!
//! Work is submitted either as single-shot closures or as ranged tasks that
//! split `[0, total)` across partitions, each invoked as
//! `f(start, end, partition_index)`. Tasks run to completion on a worker
//! thread; the only synchronization primitive callers see is the returned
//! [`CompletionHandle`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

use bevy_tasks::{TaskPool, TaskPoolBuilder};
use event_listener::Event;
use once_cell::sync::Lazy;

static COMPUTE_POOL: Lazy<TaskPool> = Lazy::new(|| {
    TaskPoolBuilder::new()
        .thread_name("ember-worker".to_string())
        .build()
});

/// Get the global compute task pool.
pub fn compute_pool() -> &'static TaskPool {
    &COMPUTE_POOL
}

/// A handle that becomes signalled when the associated work finishes.
///
/// Cloning the handle observes the same completion flag.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    done: AtomicBool,
    event: Event,
}

impl CompletionHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                done: AtomicBool::new(false),
                event: Event::new(),
            }),
        }
    }

    fn complete(&self) {
        self.inner.done.store(true, SeqCst);
        self.inner.event.notify(usize::MAX);
    }

    /// Whether the work has finished.
    pub fn is_complete(&self) -> bool {
        self.inner.done.load(SeqCst)
    }

    /// Block the calling thread until the work finishes.
    pub fn wait(&self) {
        while !self.inner.done.load(SeqCst) {
            let mut listener = self.inner.event.listen();
            if self.inner.done.load(SeqCst) {
                break;
            }
            listener.as_mut().wait();
        }
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("done", &self.is_complete())
            .finish()
    }
}

/// Run a single closure on the task pool.
pub fn async_task(f: impl FnOnce() + Send + 'static) -> CompletionHandle {
    let handle = CompletionHandle::new();
    let task_handle = handle.clone();
    compute_pool()
        .spawn(async move {
            f();
            task_handle.complete();
        })
        .detach();
    handle
}

/// Split `[0, total)` across up to `num_partitions` ranged tasks.
///
/// Each partition runs `f(start, end, partition_index)` on a pool worker.
/// End of work is detected atomically by accumulating the processed count
/// and comparing it against `total`; the worker that pushes the count to
/// `total` signals the handle. There is no separate join.
pub fn async_ranged_task(
    total: u32,
    num_partitions: u32,
    f: impl Fn(u32, u32, u32) + Send + Sync + 'static,
) -> CompletionHandle {
    let handle = CompletionHandle::new();

    if total == 0 {
        handle.complete();
        return handle;
    }

    let f = Arc::new(f);
    let processed = Arc::new(AtomicUsize::new(0));
    let num_partitions = num_partitions.clamp(1, total);
    let chunk = total.div_ceil(num_partitions);

    let mut start = 0u32;
    let mut partition = 0u32;
    while start < total {
        let end = (start + chunk).min(total);
        let f = f.clone();
        let processed = processed.clone();
        let task_handle = handle.clone();
        compute_pool()
            .spawn(async move {
                f(start, end, partition);
                let count = (end - start) as usize;
                if processed.fetch_add(count, SeqCst) + count == total as usize {
                    task_handle.complete();
                }
            })
            .detach();
        start = end;
        partition += 1;
    }

    handle
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn ranged_task_covers_every_index_once() {
        let total = 1000u32;
        let hits = Arc::new((0..total).map(|_| AtomicU32::new(0)).collect::<Vec<_>>());

        let task_hits = hits.clone();
        let handle = async_ranged_task(total, 8, move |start, end, _thread| {
            for i in start..end {
                task_hits[i as usize].fetch_add(1, SeqCst);
            }
        });
        handle.wait();

        assert!(hits.iter().all(|h| h.load(SeqCst) == 1));
    }

    #[test]
    fn empty_range_completes_immediately() {
        let handle = async_ranged_task(0, 4, |_, _, _| panic!("no work expected"));
        assert!(handle.is_complete());
        handle.wait();
    }

    #[test]
    fn single_task_runs() {
        let flag = Arc::new(AtomicBool::new(false));
        let task_flag = flag.clone();
        let handle = async_task(move || task_flag.store(true, SeqCst));
        handle.wait();
        assert!(flag.load(SeqCst));
    }
}
