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
use std::num::NonZeroUsize;

/// The worker pool needs at least two threads so that one stuck job can't starve the rest.
pub const MIN_WORKER_THREADS: usize = 2;

/// How many jobs a serial queue runs before yielding its worker thread to other queues.
pub const DEFAULT_QUEUE_BATCH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub worker_threads: usize,
    pub queue_batch: usize,
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_queue_batch(mut self, queue_batch: usize) -> Self {
        self.queue_batch = queue_batch;
        self
    }

    pub(crate) fn effective_threads(&self) -> usize {
        self.worker_threads.max(MIN_WORKER_THREADS)
    }

    pub(crate) fn effective_batch(&self) -> usize {
        self.queue_batch.max(1)
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(MIN_WORKER_THREADS);
        Self {
            worker_threads,
            queue_batch: DEFAULT_QUEUE_BATCH,
        }
    }
}
