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
mod helpers;

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use component_runtime::ComponentState;
use framework::{Properties, ServiceRegistration};
use helpers::{Recorder, TestEnv, TIMEOUT};
use rstest::rstest;
use serde_json::json;
use test_utils::random::{make_seedable_rng, Rng, Seed};

#[rstest]
#[case(Seed::from_entropy())]
fn transitions_of_a_configuration_never_overlap(#[case] seed: Seed) {
    let mut rng = test_utils::make_seedable_rng!(seed);
    let env = TestEnv::new();
    let recorder = Recorder::new();
    let manifest = json!([{
        "implementation-class": "test::Stormy",
        "name": "stormy",
        "modified": "modified",
        "configuration-policy": "optional",
        "configuration-pid": ["$"],
        "service": {"interfaces": ["test::Y"]},
        "references": [
            {"name": "many", "interface": "test::X", "cardinality": "0..n", "policy": "dynamic"},
            {"name": "one", "interface": "test::Z", "cardinality": "1..1", "policy": "static"},
        ],
    }]);
    let module = env.start_module("m", manifest, &[("test::Stormy", recorder.factory())]);
    let manager = env.manager(&module, "stormy");
    let admin_configuration = env.admin.get_configuration("stormy").unwrap();

    let done = AtomicBool::new(false);
    let violations = AtomicUsize::new(0);
    let thread_seeds: Vec<u64> = (0..rng.gen_range(2..5)).map(|_| rng.gen()).collect();
    let steps = rng.gen_range(50..150);

    thread::scope(|scope| {
        // A 1..1 reference is bound to exactly one service whenever the component is active.
        scope.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                for configuration in manager.configurations() {
                    let snapshot = configuration.snapshot();
                    if snapshot.state == ComponentState::Active
                        && snapshot.references[1].bound.len() != 1
                    {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
                thread::yield_now();
            }
        });

        let workers: Vec<_> = thread_seeds
            .iter()
            .map(|thread_seed| {
                let (env, manager, admin_configuration) = (&env, &manager, &admin_configuration);
                scope.spawn(move || {
                    let mut rng = make_seedable_rng(Seed::from_u64(*thread_seed));
                    let mut registrations: Vec<ServiceRegistration> = Vec::new();
                    for step in 0..steps {
                        match rng.gen_range(0..6) {
                            0 => registrations.push(env.register("test::X", Properties::new())),
                            1 => registrations.push(env.register("test::Z", Properties::new())),
                            2 if !registrations.is_empty() => {
                                let index = rng.gen_range(0..registrations.len());
                                let _ = registrations.swap_remove(index).unregister();
                            }
                            3 => {
                                let properties = Properties::new().with("step", step as i64);
                                let _ = admin_configuration.update(properties);
                            }
                            4 => {
                                let _ = manager.disable();
                            }
                            _ => {
                                let _ = manager.enable();
                            }
                        }
                    }
                    registrations
                })
            })
            .collect();
        let registrations: Vec<_> =
            workers.into_iter().flat_map(|worker| worker.join().unwrap()).collect();

        assert!(manager.enable().wait_timeout(TIMEOUT));
        for registration in registrations {
            let _ = registration.unregister();
        }
        let _provider = env.register("test::Z", Properties::new());
        let configuration = env.configuration(&module, "stormy");
        env.wait_state(&configuration, ComponentState::Active);
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert!(!recorder.overlapped.load(Ordering::SeqCst));
}
