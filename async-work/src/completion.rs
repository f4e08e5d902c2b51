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
    sync::Arc,
    time::{Duration, Instant},
};

use logging::log;
use parking_lot::{Condvar, Mutex};

use crate::serial_queue::{self, QueueId};

enum SignalState {
    Pending,
    Done,
    // Completes once the inner handle completes.
    Forwarded(CompletionHandle),
}

struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
    // Queue that will complete this signal, if any.
    queue: Option<QueueId>,
}

impl Signal {
    fn set(&self, new_state: SignalState) {
        let mut state = self.state.lock();
        if matches!(*state, SignalState::Pending) {
            *state = new_state;
            self.cond.notify_all();
        }
    }

    fn is_complete(&self) -> bool {
        let forwarded = match &*self.state.lock() {
            SignalState::Pending => return false,
            SignalState::Done => return true,
            SignalState::Forwarded(next) => next.clone(),
        };
        forwarded.is_complete()
    }

    fn is_queued_behind_current_job(&self) -> bool {
        let forwarded = match &*self.state.lock() {
            SignalState::Done => return false,
            SignalState::Forwarded(next) => next.clone(),
            SignalState::Pending => {
                return self.queue.is_some() && self.queue == serial_queue::current_queue()
            }
        };
        forwarded.is_queued_behind_current_job()
    }

    /// Returns false if the deadline passed before completion.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        loop {
            let forwarded = match &*state {
                SignalState::Done => return true,
                SignalState::Forwarded(next) => Some(next.clone()),
                SignalState::Pending => None,
            };
            if let Some(next) = forwarded {
                drop(state);
                return next.wait_until(deadline);
            }

            if self.queue.is_some() && self.queue == serial_queue::current_queue() {
                log::warn!("Not waiting for work queued behind the current job of the same queue");
                return false;
            }
            match deadline {
                None => self.cond.wait(&mut state),
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, SignalState::Pending)
                    {
                        return false;
                    }
                }
            }
        }
    }
}

/// Producer side of a [CompletionHandle].
///
/// Dropping a `Completion` without completing it (e.g. because the job owning it panicked)
/// completes it, so waiters are never stranded.
#[must_use = "A completion must be completed or forwarded"]
pub struct Completion {
    signal: Arc<Signal>,
}

impl Completion {
    pub fn new() -> (Completion, CompletionHandle) {
        Self::new_on(None)
    }

    pub(crate) fn new_on(queue: Option<QueueId>) -> (Completion, CompletionHandle) {
        let signal = Arc::new(Signal {
            state: Mutex::new(SignalState::Pending),
            cond: Condvar::new(),
            queue,
        });
        let handle = CompletionHandle {
            signals: vec![Arc::clone(&signal)],
        };
        (Completion { signal }, handle)
    }

    pub fn complete(self) {
        self.signal.set(SignalState::Done);
    }

    /// Complete once `next` completes, without blocking the current thread.
    pub fn complete_after(self, next: CompletionHandle) {
        if next.signals.is_empty() {
            self.signal.set(SignalState::Done);
        } else {
            self.signal.set(SignalState::Forwarded(next));
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.signal.set(SignalState::Done);
    }
}

/// Shared, cloneable view of the eventual completion of one or more pieces of work.
#[derive(Clone)]
#[must_use = "Dropping a completion handle does not cancel the work; ignore it explicitly"]
pub struct CompletionHandle {
    signals: Vec<Arc<Signal>>,
}

impl CompletionHandle {
    /// A handle that is already complete.
    pub fn ready() -> Self {
        Self {
            signals: Vec::new(),
        }
    }

    /// A handle that completes when all of `handles` do.
    pub fn join(handles: impl IntoIterator<Item = CompletionHandle>) -> Self {
        let signals = handles.into_iter().flat_map(|handle| handle.signals).collect();
        Self { signals }
    }

    pub fn is_complete(&self) -> bool {
        self.signals.iter().all(|signal| signal.is_complete())
    }

    /// Whether some unfinished part of the work waits on the job running on this thread.
    ///
    /// Waiting for such work returns immediately instead of blocking.
    pub fn is_queued_behind_current_job(&self) -> bool {
        self.signals.iter().any(|signal| signal.is_queued_behind_current_job())
    }

    /// Block until the work is done.
    ///
    /// Work queued on the serial queue that is currently running on this thread can't make
    /// progress while we block, so such parts are skipped with a warning instead.
    pub fn wait(&self) {
        self.wait_until(None);
    }

    /// Block for at most `timeout`; returns whether the work is done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        self.signals.iter().fold(true, |done, signal| signal.wait(deadline) && done)
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("parts", &self.signals.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}
