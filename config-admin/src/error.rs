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
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Configuration '{0}' has been removed")]
    Removed(String),
    #[error("Invalid PID '{0}'")]
    InvalidPid(String),
    #[error("Invalid factory PID '{0}'")]
    InvalidFactoryPid(String),
    #[error("Invalid factory instance name '{0}'")]
    InvalidInstanceName(String),
    #[error("The configuration admin has been shut down")]
    AdminGone,
}

/// Reported by a consumer that failed to apply a configuration change.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
