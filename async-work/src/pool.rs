// Copyright (c) 2021-2025 RBB S.r.l
// opensource@mintlayer.org
// SPDX-License-Identifier: MIT
// Licensed under the MIT License;
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://github.com/mintlayer/mintlayer-core/blob/master/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use logging::log;
use parking_lot::{Condvar, Mutex};

use crate::{Completion, CompletionHandle, WorkError, WorkerPoolConfig};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolInner {
    name: String,
    threads: slave_pool::ThreadPool,
    queue_batch: usize,
    // Number of jobs spawned but not yet finished.
    outstanding: Mutex<usize>,
    idle: Condvar,
}

/// A fixed set of background threads shared by the whole runtime instance.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, config: &WorkerPoolConfig) -> Result<Self, WorkError> {
        let name = name.into();
        let threads = slave_pool::ThreadPool::new();
        let thread_count = u16::try_from(config.effective_threads()).unwrap_or(u16::MAX);
        threads
            .set_threads(thread_count)
            .map_err(|err| WorkError::PoolStart(format!("{err:?}")))?;

        log::debug!("Worker pool '{name}' started with {thread_count} threads");

        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                threads,
                queue_batch: config.effective_batch(),
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn queue_batch(&self) -> usize {
        self.inner.queue_batch
    }

    /// Run `job` on one of the pool's threads.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> CompletionHandle {
        let (completion, handle) = Completion::new();
        self.spawn_raw(Box::new(move || {
            job();
            completion.complete();
        }));
        handle
    }

    pub(crate) fn spawn_raw(&self, job: Job) {
        *self.inner.outstanding.lock() += 1;

        let inner = Arc::clone(&self.inner);
        self.inner.threads.spawn(move || {
            run_guarded(&inner.name, job);

            let mut outstanding = inner.outstanding.lock();
            *outstanding -= 1;
            if *outstanding == 0 {
                inner.idle.notify_all();
            }
        });
    }

    /// Block until no job is queued or running.
    pub fn wait_idle(&self) {
        let mut outstanding = self.inner.outstanding.lock();
        while *outstanding > 0 {
            self.inner.idle.wait(&mut outstanding);
        }
    }

    /// Like [Self::wait_idle] but gives up after `timeout`; returns whether the pool is idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.inner.outstanding.lock();
        while *outstanding > 0 {
            if self.inner.idle.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("name", &self.inner.name).finish()
    }
}

/// Run a job, containing any panic so that the worker thread survives it.
pub(crate) fn run_guarded(context: &str, job: Job) {
    if let Err(err) = catch_unwind(AssertUnwindSafe(job)) {
        let msg = err
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| err.downcast_ref::<String>().map(AsRef::as_ref))
            .unwrap_or("???");
        log::error!("Job on '{context}' panicked: {msg}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Barrier,
    };

    use super::*;

    fn make_pool(threads: usize) -> WorkerPool {
        WorkerPool::new("test", &WorkerPoolConfig::new().with_worker_threads(threads)).unwrap()
    }

    #[test]
    fn spawned_jobs_run() {
        let pool = make_pool(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        CompletionHandle::join(handles).wait();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn jobs_run_in_parallel() {
        let pool = make_pool(2);
        // Both jobs must be running at the same time for the barrier to open.
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                pool.spawn(move || {
                    barrier.wait();
                })
            })
            .collect();
        assert!(CompletionHandle::join(handles).wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn panicking_job_does_not_kill_the_pool() {
        let pool = make_pool(2);
        let handle = pool.spawn(|| panic!("boom"));
        assert!(handle.wait_timeout(Duration::from_secs(10)));

        let counter = Arc::new(AtomicUsize::new(0));
        let handle = {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        handle.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_idle_covers_all_jobs() {
        let pool = make_pool(3);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            let _ = pool.spawn(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(pool.wait_idle_timeout(Duration::from_secs(10)));
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
