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
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_work::{CompletionHandle, SerialQueue, WorkerPool};
use framework::{ListenerToken, Properties};
use logging::log;
use parking_lot::{Mutex, RwLock};

use crate::factory_pid_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationEventKind {
    Updated,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationEvent {
    pub pid: String,
    pub factory_pid: Option<String>,
    pub kind: ConfigurationEventKind,
    /// The properties as of this change; empty for [ConfigurationEventKind::Removed].
    pub properties: Properties,
    pub change_count: u64,
}

impl ConfigurationEvent {
    pub(crate) fn updated(pid: &str, properties: Properties, change_count: u64) -> Self {
        Self {
            pid: pid.to_owned(),
            factory_pid: factory_pid_of(pid).map(str::to_owned),
            kind: ConfigurationEventKind::Updated,
            properties,
            change_count,
        }
    }

    pub(crate) fn removed(pid: &str, change_count: u64) -> Self {
        Self {
            pid: pid.to_owned(),
            factory_pid: factory_pid_of(pid).map(str::to_owned),
            kind: ConfigurationEventKind::Removed,
            properties: Properties::new(),
            change_count,
        }
    }
}

/// Which configurations a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// Exactly this PID.
    Pid(String),
    /// Every instance `factory_pid~name` of this factory PID.
    Factory(String),
}

impl ListenerScope {
    pub fn matches(&self, pid: &str) -> bool {
        match self {
            ListenerScope::Pid(p) => p == pid,
            ListenerScope::Factory(f) => factory_pid_of(pid) == Some(f.as_str()),
        }
    }
}

/// Consumer of configuration changes.
///
/// Called on the serial queue of the changed PID. The returned handle lets the listener hand
/// the actual work to its own queue; the caller of the configuration change may wait on it.
pub trait ConfigurationListener: Send + Sync {
    fn configuration_event(&self, event: &ConfigurationEvent) -> CompletionHandle;
}

struct ListenerEntry {
    token: ListenerToken,
    scope: ListenerScope,
    listener: Arc<dyn ConfigurationListener>,
    // PID -> change count of the last delivered update.
    delivered: Mutex<HashMap<String, u64>>,
}

impl ListenerEntry {
    /// Hand the event to the listener unless it already saw this change or a newer one.
    fn deliver(&self, event: &ConfigurationEvent) -> CompletionHandle {
        {
            let mut delivered = self.delivered.lock();
            match event.kind {
                ConfigurationEventKind::Updated => {
                    if delivered.get(&event.pid).is_some_and(|last| *last >= event.change_count) {
                        log::debug!(
                            "Skipping stale update of '{}' (change {}) for listener {:?}",
                            event.pid,
                            event.change_count,
                            self.token
                        );
                        return CompletionHandle::ready();
                    }
                    delivered.insert(event.pid.clone(), event.change_count);
                }
                ConfigurationEventKind::Removed => {
                    // Nothing to retract if the listener never saw the configuration.
                    if delivered.remove(&event.pid).is_none() {
                        return CompletionHandle::ready();
                    }
                }
            }
        }

        match catch_unwind(AssertUnwindSafe(|| self.listener.configuration_event(event))) {
            Ok(handle) => handle,
            Err(_) => {
                log::error!(
                    "Configuration listener {:?} panicked while handling {:?} of '{}'",
                    self.token,
                    event.kind,
                    event.pid
                );
                CompletionHandle::ready()
            }
        }
    }
}

struct PidQueue {
    queue: SerialQueue,
    // Jobs posted and not yet run; the queue of a removed PID is dropped once this is zero.
    pending: usize,
}

/// Delivers configuration events with one serial queue per PID.
pub(crate) struct Notifier {
    pool: WorkerPool,
    queues: Mutex<HashMap<String, PidQueue>>,
    listeners: RwLock<Vec<Arc<ListenerEntry>>>,
    next_token: AtomicU64,
}

impl Notifier {
    pub fn new(pool: WorkerPool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            queues: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Run `job` on the queue of `pid`. A removal job that leaves the queue idle drops it.
    fn post(
        self: &Arc<Self>,
        pid: &str,
        kind: ConfigurationEventKind,
        job: impl FnOnce() -> CompletionHandle + Send + 'static,
    ) -> CompletionHandle {
        let mut queues = self.queues.lock();
        let entry = queues.entry(pid.to_owned()).or_insert_with(|| PidQueue {
            queue: SerialQueue::new(&self.pool, format!("config:{pid}")),
            pending: 0,
        });
        entry.pending += 1;
        let this = Arc::clone(self);
        let pid = pid.to_owned();
        entry.queue.post_chained(move || {
            let handle = job();
            this.job_done(&pid, kind);
            handle
        })
    }

    fn job_done(&self, pid: &str, kind: ConfigurationEventKind) {
        let mut queues = self.queues.lock();
        let Some(entry) = queues.get_mut(pid) else {
            return;
        };
        entry.pending = entry.pending.saturating_sub(1);
        if kind == ConfigurationEventKind::Removed && entry.pending == 0 {
            queues.remove(pid);
            log::debug!("Dropped the notification queue of removed configuration '{pid}'");
        }
    }

    #[cfg(test)]
    fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Queue delivery of `event` to every listener interested in its PID at delivery time.
    pub fn notify(self: &Arc<Self>, event: ConfigurationEvent) -> CompletionHandle {
        let this = Arc::clone(self);
        let pid = event.pid.clone();
        self.post(&pid, event.kind, move || {
            let entries: Vec<Arc<ListenerEntry>> = this
                .listeners
                .read()
                .iter()
                .filter(|entry| entry.scope.matches(&event.pid))
                .cloned()
                .collect();
            log::debug!(
                "Delivering {:?} of '{}' (change {}) to {} listener(s)",
                event.kind,
                event.pid,
                event.change_count,
                entries.len()
            );
            CompletionHandle::join(entries.iter().map(|entry| entry.deliver(&event)))
        })
    }

    pub fn add_listener(
        &self,
        scope: ListenerScope,
        listener: Arc<dyn ConfigurationListener>,
    ) -> ListenerToken {
        let token = ListenerToken::new(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Arc::new(ListenerEntry {
            token,
            scope,
            listener,
            delivered: Mutex::new(HashMap::new()),
        }));
        token
    }

    /// Queue delivery of the current state of a configuration to a single new listener.
    pub fn notify_one(
        self: &Arc<Self>,
        token: ListenerToken,
        event: ConfigurationEvent,
    ) -> CompletionHandle {
        let Some(entry) = self.listeners.read().iter().find(|e| e.token == token).cloned() else {
            return CompletionHandle::ready();
        };
        let pid = event.pid.clone();
        self.post(&pid, event.kind, move || entry.deliver(&event))
    }

    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.token != token);
        listeners.len() != before
    }

    pub fn scope_of(&self, token: ListenerToken) -> Option<ListenerScope> {
        self.listeners.read().iter().find(|e| e.token == token).map(|e| e.scope.clone())
    }
}
