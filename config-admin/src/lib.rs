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
//! In-memory configuration admin.
//!
//! Configurations are versioned property sets identified by a PID. Every change is delivered
//! asynchronously to the interested consumers, in order per PID, at most once per change.

mod admin;
mod configuration;
mod error;
mod managed;
mod notifier;
mod static_config;

pub use admin::{ConfigurationAdmin, FrameworkConnection};
pub use configuration::Configuration;
pub use error::{ConfigurationError, DeliveryError};
pub use managed::{
    ManagedService, ManagedServiceFactory, ManagedServiceFactoryHandle, ManagedServiceHandle,
    MANAGED_SERVICE_FACTORY_INTERFACE, MANAGED_SERVICE_INTERFACE,
};
pub use notifier::{
    ConfigurationEvent, ConfigurationEventKind, ConfigurationListener, ListenerScope,
};

pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Separates the factory PID from the instance name in a factory configuration PID.
pub const FACTORY_PID_SEPARATOR: char = '~';

/// Manifest header holding a module's static configurations.
pub const CM_HEADER: &str = "cm";

/// The factory PID part of `pid`, if it names a factory configuration instance.
pub fn factory_pid_of(pid: &str) -> Option<&str> {
    pid.split_once(FACTORY_PID_SEPARATOR).map(|(factory_pid, _)| factory_pid)
}

#[cfg(test)]
#[ctor::ctor]
fn init() {
    logging::init_logging();
}
