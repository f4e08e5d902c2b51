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

use std::collections::HashSet;

use framework::{keys, Filter, PropertyValue, ServiceId, ServiceReference};

use crate::metadata::ReferenceMetadata;

/// Change of the bound set of one reference.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct BindingDelta {
    pub bound: Vec<ServiceReference>,
    pub unbound: Vec<ServiceReference>,
}

impl BindingDelta {
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty() && self.unbound.is_empty()
    }

    fn merge(mut self, other: BindingDelta) -> Self {
        self.bound.extend(other.bound);
        self.unbound.extend(other.unbound);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManualBind {
    Added,
    AlreadyBound,
    Full,
}

/// Binding state of one reference of one component configuration.
///
/// `matched` holds every registered service satisfying the interface and target, best ranked
/// first; `bound` is the subset handed to the component. A frozen reference (static, owner
/// active) records arrivals but never changes its bound set except for losses.
pub(crate) struct ReferenceManager {
    metadata: ReferenceMetadata,
    target: Option<Filter>,
    // component.id of the owning configuration; its own services never match.
    owner_id: i64,
    matched: Vec<ServiceReference>,
    bound: Vec<ServiceReference>,
    // Services that failed to bind or were unbound by hand; skipped until re-registered.
    rejected: HashSet<ServiceId>,
}

impl ReferenceManager {
    pub fn new(metadata: ReferenceMetadata, owner_id: i64) -> Self {
        let target = metadata.target.clone();
        Self {
            metadata,
            target,
            owner_id,
            matched: Vec::new(),
            bound: Vec::new(),
            rejected: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn interface(&self) -> &str {
        &self.metadata.interface
    }

    pub fn is_dynamic(&self) -> bool {
        self.metadata.is_dynamic()
    }

    pub fn target(&self) -> Option<&Filter> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: Option<Filter>) -> bool {
        if self.target == target {
            return false;
        }
        self.target = target;
        true
    }

    pub fn is_satisfied(&self) -> bool {
        self.bound.len() >= self.metadata.cardinality.min()
    }

    pub fn bound(&self) -> &[ServiceReference] {
        &self.bound
    }

    pub fn matched(&self) -> &[ServiceReference] {
        &self.matched
    }

    pub fn is_bound(&self, reference: &ServiceReference) -> bool {
        self.bound.contains(reference)
    }

    /// Whether `reference` is a registered service this reference may bind.
    pub fn accepts(&self, reference: &ServiceReference) -> bool {
        reference.is_registered()
            && reference.matches(&self.metadata.interface, self.target.as_ref())
            && reference.property(keys::COMPONENT_ID) != Some(PropertyValue::Int(self.owner_id))
    }

    pub fn service_added(&mut self, reference: &ServiceReference, frozen: bool) -> BindingDelta {
        if !self.accepts(reference) {
            return BindingDelta::default();
        }
        if !self.matched.contains(reference) {
            self.matched.push(reference.clone());
        }
        self.matched.sort();
        if frozen {
            BindingDelta::default()
        } else {
            self.recompute()
        }
    }

    pub fn service_removed(&mut self, reference: &ServiceReference, frozen: bool) -> BindingDelta {
        self.matched.retain(|r| r != reference);
        self.rejected.remove(&reference.id());
        let lost = if self.is_bound(reference) {
            self.bound.retain(|r| r != reference);
            BindingDelta {
                bound: Vec::new(),
                unbound: vec![reference.clone()],
            }
        } else {
            BindingDelta::default()
        };
        if frozen {
            lost
        } else {
            lost.merge(self.recompute())
        }
    }

    /// Properties of `reference` changed: it may have started or stopped matching.
    pub fn service_modified(&mut self, reference: &ServiceReference, frozen: bool) -> BindingDelta {
        if self.accepts(reference) {
            self.service_added(reference, frozen)
        } else if self.matched.contains(reference) {
            self.service_removed(reference, frozen)
        } else {
            BindingDelta::default()
        }
    }

    /// Replace the matched set with `candidates`, e.g. after a scan or a target change.
    pub fn reset(&mut self, candidates: Vec<ServiceReference>) -> BindingDelta {
        self.matched = candidates.into_iter().filter(|r| self.accepts(r)).collect();
        self.matched.sort();
        let lost: Vec<ServiceReference> =
            self.bound.iter().filter(|r| !self.matched.contains(r)).cloned().collect();
        self.bound.retain(|r| !lost.contains(r));
        BindingDelta {
            bound: Vec::new(),
            unbound: lost,
        }
        .merge(self.recompute())
    }

    /// `reference` could not be bound; choose again without it.
    pub fn reject(&mut self, reference: &ServiceReference) -> BindingDelta {
        self.rejected.insert(reference.id());
        self.bound.retain(|r| r != reference);
        self.recompute()
    }

    pub fn clear_rejections(&mut self) {
        self.rejected.clear();
    }

    /// Choose the bound set again, e.g. once a frozen reference thaws.
    pub fn refresh(&mut self) -> BindingDelta {
        self.recompute()
    }

    pub fn manual_bind(&mut self, reference: &ServiceReference) -> ManualBind {
        self.rejected.remove(&reference.id());
        if !self.matched.contains(reference) {
            self.matched.push(reference.clone());
            self.matched.sort();
        }
        if self.is_bound(reference) {
            return ManualBind::AlreadyBound;
        }
        if self.bound.len() >= self.metadata.cardinality.max() {
            return ManualBind::Full;
        }
        self.bound.push(reference.clone());
        ManualBind::Added
    }

    /// Returns false if `reference` was not bound.
    pub fn manual_unbind(&mut self, reference: &ServiceReference) -> bool {
        if !self.is_bound(reference) {
            return false;
        }
        self.bound.retain(|r| r != reference);
        self.rejected.insert(reference.id());
        true
    }

    /// Choose the bound set from the matched services according to cardinality and policy
    /// option; an unsatisfiable reference binds nothing.
    fn recompute(&mut self) -> BindingDelta {
        let cardinality = self.metadata.cardinality;
        let available: Vec<&ServiceReference> =
            self.matched.iter().filter(|r| !self.rejected.contains(&r.id())).collect();

        let desired: Vec<ServiceReference> = if available.len() < cardinality.min() {
            Vec::new()
        } else if cardinality.is_multiple() {
            available.iter().take(cardinality.max()).map(|r| (*r).clone()).collect()
        } else {
            let best = available.first().map(|r| (*r).clone());
            match self.bound.first() {
                // A reluctant reference keeps what it has; a greedy one moves to the best.
                Some(current)
                    if available.contains(&current)
                        && (!self.metadata.is_greedy() || best.as_ref() == Some(current)) =>
                {
                    vec![current.clone()]
                }
                _ => best.into_iter().collect(),
            }
        };

        let unbound: Vec<ServiceReference> =
            self.bound.iter().filter(|r| !desired.contains(r)).cloned().collect();
        let bound: Vec<ServiceReference> =
            desired.into_iter().filter(|r| !self.bound.contains(r)).collect();
        self.bound.retain(|r| !unbound.contains(r));
        self.bound.extend(bound.iter().cloned());
        BindingDelta { bound, unbound }
    }
}
