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

use async_work::WorkError;
use framework::ServiceId;

use crate::metadata::MetadataError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Component '{name}' of module {module} not found")]
    NotFound { module: u64, name: String },
    #[error("Component '{component}' has no reference named '{reference}'")]
    UnknownReference { component: String, reference: String },
    #[error(
        "Reference '{reference}' of component '{component}' is static and can't change while the component is active"
    )]
    StaticReference { component: String, reference: String },
    #[error("Service {service} can't be bound to reference '{reference}'")]
    ServiceMismatch { reference: String, service: ServiceId },
    #[error("Binding service {service} to reference '{reference}' failed: {reason}")]
    BindFailed {
        reference: String,
        service: ServiceId,
        reason: String,
    },
    #[error("Component configuration {0} has been disposed")]
    Disposed(u64),
    #[error("Component configuration {0} can't be changed from its own callbacks")]
    Reentrant(u64),
    #[error("Service component runtime is stopped")]
    Stopped,
    #[error("Worker pool error: {0}")]
    Work(#[from] WorkError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Failure reported by component implementation code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ComponentError(pub String);

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
