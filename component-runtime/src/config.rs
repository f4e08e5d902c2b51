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

use std::time::Duration;

use async_work::WorkerPoolConfig;

/// How long module teardown waits for a component to be disabled before moving on.
pub const DEFAULT_DISABLE_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Threads of the pool running all component lifecycle work.
    pub worker_threads: usize,
    /// Upper bound for waiting on enable/disable when a module starts or stops.
    pub disable_wait_timeout: Duration,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_disable_wait_timeout(mut self, timeout: Duration) -> Self {
        self.disable_wait_timeout = timeout;
        self
    }

    pub(crate) fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new().with_worker_threads(self.worker_threads)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: WorkerPoolConfig::default().worker_threads,
            disable_wait_timeout: DEFAULT_DISABLE_WAIT_TIMEOUT,
        }
    }
}
