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
//! Background execution for the component runtime.
//!
//! All lifecycle work (activation, binding, configuration delivery) runs on a shared
//! [WorkerPool]. Work that must not overlap is posted to a [SerialQueue]; each submission
//! yields a [CompletionHandle] that the caller may wait on or ignore.

mod completion;
mod config;
mod pool;
mod serial_queue;

pub use completion::{Completion, CompletionHandle};
pub use config::WorkerPoolConfig;
pub use pool::WorkerPool;
pub use serial_queue::{QueueId, SerialQueue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to start worker threads: {0}")]
    PoolStart(String),
}

#[cfg(test)]
#[ctor::ctor]
fn init() {
    logging::init_logging();
}
