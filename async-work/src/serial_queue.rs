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
    cell::Cell,
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    pool::{run_guarded, Job},
    Completion, CompletionHandle, WorkerPool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u64);

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// The queue whose job is executing on this thread, if any.
pub(crate) fn current_queue() -> Option<QueueId> {
    CURRENT_QUEUE.with(Cell::get)
}

struct QueueState {
    jobs: VecDeque<Job>,
    // A drain task is scheduled or running on the pool.
    draining: bool,
}

struct QueueInner {
    id: QueueId,
    name: String,
    pool: WorkerPool,
    state: Mutex<QueueState>,
}

/// Runs posted jobs one at a time, in submission order, on a shared [WorkerPool].
///
/// Jobs of different queues run in parallel; jobs of the same queue never overlap.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

impl SerialQueue {
    pub fn new(pool: &WorkerPool, name: impl Into<String>) -> Self {
        let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(QueueInner {
                id,
                name: name.into(),
                pool: pool.clone(),
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    draining: false,
                }),
            }),
        }
    }

    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is currently executing a job of this queue.
    pub fn is_current(&self) -> bool {
        current_queue() == Some(self.inner.id)
    }

    /// Queue `job`; the returned handle completes once it has run.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> CompletionHandle {
        let (completion, handle) = Completion::new_on(Some(self.inner.id));
        self.push(Box::new(move || {
            job();
            completion.complete();
        }));
        handle
    }

    /// Queue `job`; the returned handle completes once the handle produced by `job` does.
    ///
    /// This lets a job hand further work to other queues without blocking its worker.
    pub fn post_chained(
        &self,
        job: impl FnOnce() -> CompletionHandle + Send + 'static,
    ) -> CompletionHandle {
        let (completion, handle) = Completion::new_on(Some(self.inner.id));
        self.push(Box::new(move || {
            completion.complete_after(job());
        }));
        handle
    }

    fn push(&self, job: Job) {
        let start_drain = {
            let mut state = self.inner.state.lock();
            state.jobs.push_back(job);
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            Self::schedule_drain(Arc::clone(&self.inner));
        }
    }

    fn schedule_drain(inner: Arc<QueueInner>) {
        let pool = inner.pool.clone();
        pool.spawn_raw(Box::new(move || Self::drain(inner)));
    }

    fn drain(inner: Arc<QueueInner>) {
        let previous = CURRENT_QUEUE.with(|current| current.replace(Some(inner.id)));

        for _ in 0..inner.pool.queue_batch() {
            let job = {
                let mut state = inner.state.lock();
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        state.draining = false;
                        CURRENT_QUEUE.with(|current| current.set(previous));
                        return;
                    }
                }
            };
            run_guarded(&inner.name, job);
        }

        CURRENT_QUEUE.with(|current| current.set(previous));

        // Batch exhausted: give other queues a turn, then continue.
        let more = {
            let mut state = inner.state.lock();
            state.draining = !state.jobs.is_empty();
            state.draining
        };
        if more {
            Self::schedule_drain(inner);
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
