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

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_work::WorkerPool;
use config_admin::ConfigurationAdmin;
use framework::ServiceRegistry;

use crate::config::RuntimeConfig;

/// Everything the managers and configurations of one runtime share.
pub(crate) struct RuntimeContext {
    pub services: Arc<ServiceRegistry>,
    pub admin: ConfigurationAdmin,
    pub pool: WorkerPool,
    pub config: RuntimeConfig,
    next_configuration_id: AtomicU64,
}

impl RuntimeContext {
    pub fn new(
        services: Arc<ServiceRegistry>,
        admin: ConfigurationAdmin,
        pool: WorkerPool,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            services,
            admin,
            pool,
            config,
            next_configuration_id: AtomicU64::new(1),
        })
    }

    pub fn next_configuration_id(&self) -> u64 {
        self.next_configuration_id.fetch_add(1, Ordering::Relaxed)
    }
}
