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
    sync::{Arc, Barrier},
    thread,
};

use async_work::CompletionHandle;
use config_admin::ConfigurationError;
use framework::{ModuleDescriptor, Properties};
use helpers::{FactoryCall, RecordingFactory, RecordingService, TestEnv, TIMEOUT};
use rstest::rstest;
use serde_json::json;
use test_utils::random::{Rng, Seed};

fn numbered(i: i64) -> Properties {
    Properties::new().with("seq", i)
}

#[test]
fn sequential_updates_arrive_in_order() {
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::default());
    let _reg = env.register_managed_service("ordered", service.clone());

    let config = env.admin.get_configuration("ordered").unwrap();
    let handles: Vec<CompletionHandle> =
        (0..50).map(|i| config.update(numbered(i)).unwrap()).collect();
    assert!(CompletionHandle::join(handles).wait_timeout(TIMEOUT));

    let expected: Vec<_> = (0..50).map(|i| Some(numbered(i))).collect();
    assert_eq!(service.calls(), expected);
}

#[rstest]
#[case(Seed::from_entropy())]
fn racing_updates_are_delivered_once_each_in_change_order(#[case] seed: Seed) {
    let mut rng = test_utils::make_seedable_rng!(seed);
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::default());
    let _reg = env.register_managed_service("raced", service.clone());
    let config = env.admin.get_configuration("raced").unwrap();

    let threads = rng.gen_range(2..6);
    let per_thread = rng.gen_range(5..20);
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_thread)
                    .map(|i| config.update(numbered((t * 1000 + i) as i64)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let handles: Vec<_> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
    assert!(CompletionHandle::join(handles).wait_timeout(TIMEOUT));

    let calls = service.calls();
    assert_eq!(calls.len(), threads * per_thread);
    // The last delivery is the final state of the configuration.
    assert_eq!(calls.last().cloned().flatten(), Some(config.get_properties().unwrap()));
    // Updates issued by one thread are observed in the order that thread issued them.
    for t in 0..threads {
        let seqs: Vec<i64> = calls
            .iter()
            .filter_map(|c| c.as_ref()?.get("seq")?.as_i64())
            .filter(|s| s / 1000 == t as i64)
            .collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
    }
}

#[test]
fn update_if_different_suppresses_identical_properties() {
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::default());
    let _reg = env.register_managed_service("idem", service.clone());
    let config = env.admin.get_configuration("idem").unwrap();
    let props = Properties::new().with("anInt", 5);

    let (first, h1) = config.update_if_different(props.clone()).unwrap();
    let (second, h2) = config.update_if_different(props.clone()).unwrap();
    assert!(first);
    assert!(!second);
    assert!(CompletionHandle::join([h1, h2]).wait_timeout(TIMEOUT));
    assert_eq!(service.calls(), vec![Some(props.clone())]);

    let h3 = config.update(props.clone()).unwrap();
    let h4 = config.update(props.clone()).unwrap();
    assert!(CompletionHandle::join([h3, h4]).wait_timeout(TIMEOUT));
    assert_eq!(service.calls().len(), 3);
}

#[test]
fn removed_and_recreated_configuration_is_a_new_entity() {
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::default());
    let _reg = env.register_managed_service("recreated", service.clone());

    let first = env.admin.get_configuration("recreated").unwrap();
    first.update(Properties::new().with("v", 1)).unwrap().wait();
    first.remove().unwrap().wait();

    let second = env.admin.get_configuration("recreated").unwrap();
    assert_ne!(first, second);
    assert!(second.get_properties().unwrap().is_empty());
    assert_eq!(second.get_change_count().unwrap(), 0);

    // The stale handle can't touch the new entity.
    assert_eq!(
        first.update(Properties::new().with("v", 2)).err(),
        Some(ConfigurationError::Removed("recreated".to_owned()))
    );
    assert!(second.get_properties().unwrap().is_empty());

    second.update(Properties::new().with("v", 3)).unwrap().wait();
    assert_eq!(
        service.calls(),
        vec![
            Some(Properties::new().with("v", 1)),
            None,
            Some(Properties::new().with("v", 3)),
        ]
    );
}

#[test]
fn late_managed_service_gets_current_state_once() {
    let env = TestEnv::new();
    let config = env.admin.get_configuration("late").unwrap();
    config.update(Properties::new().with("v", 1)).unwrap().wait();
    config.update(Properties::new().with("v", 2)).unwrap().wait();

    let service = Arc::new(RecordingService::default());
    let _reg = env.register_managed_service("late", service.clone());
    env.settle();
    assert_eq!(service.calls(), vec![Some(Properties::new().with("v", 2))]);

    // A configuration that was never updated isn't delivered at all.
    let _untouched = env.admin.get_configuration("untouched").unwrap();
    let quiet = Arc::new(RecordingService::default());
    let _reg2 = env.register_managed_service("untouched", quiet.clone());
    env.settle();
    assert!(quiet.calls().is_empty());
}

#[rstest]
#[case(Seed::from_entropy())]
fn registration_racing_update_if_different_delivers_exactly_once(#[case] seed: Seed) {
    let mut rng = test_utils::make_seedable_rng!(seed);
    let env = Arc::new(TestEnv::new());

    for round in 0..20 {
        let pid = format!("race.{round}");
        let service = Arc::new(RecordingService::default());
        let props = Properties::new().with("round", round as i64);
        let delay = rng.gen_range(0..200);
        let barrier = Arc::new(Barrier::new(2));

        let registrar = {
            let env = Arc::clone(&env);
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            let pid = pid.clone();
            thread::spawn(move || {
                barrier.wait();
                thread::sleep(std::time::Duration::from_micros(delay));
                env.register_managed_service(&pid, service)
            })
        };
        let updater = {
            let env = Arc::clone(&env);
            let barrier = Arc::clone(&barrier);
            let pid = pid.clone();
            let props = props.clone();
            thread::spawn(move || {
                barrier.wait();
                let config = env.admin.get_configuration(&pid).unwrap();
                config.update_if_different(props).unwrap().1
            })
        };

        let _reg = registrar.join().unwrap();
        assert!(updater.join().unwrap().wait_timeout(TIMEOUT));
        env.settle();
        assert_eq!(service.calls(), vec![Some(props)], "round {round}");
    }
}

#[test]
fn factory_instances_are_delivered_to_the_factory() {
    let env = TestEnv::new();
    let factory = Arc::new(RecordingFactory::default());
    let _reg = env.register_managed_service_factory("cm.testfactory", factory.clone());

    let config = env.admin.create_factory_configuration("cm.testfactory").unwrap();
    let pid = config.get_pid().unwrap();
    assert!(pid.starts_with("cm.testfactory~"));
    assert!(config.get_properties().unwrap().is_empty());
    env.settle();
    assert!(factory.calls().is_empty());

    let props = Properties::new().with("anInt", 5);
    config.update(props.clone()).unwrap().wait();
    assert_eq!(factory.calls(), vec![FactoryCall::Updated(pid.clone(), props.clone())]);

    config.remove().unwrap().wait();
    assert_eq!(
        factory.calls(),
        vec![FactoryCall::Updated(pid.clone(), props), FactoryCall::Removed(pid)]
    );
}

#[test]
fn failing_consumer_keeps_receiving_updates() {
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::failing());
    let _reg = env.register_managed_service("flaky", service.clone());
    let config = env.admin.get_configuration("flaky").unwrap();

    config.update(numbered(1)).unwrap().wait();
    config.update(numbered(2)).unwrap().wait();
    assert_eq!(service.calls(), vec![Some(numbered(1)), Some(numbered(2))]);
}

#[test]
fn unregistered_managed_service_gets_nothing_more() {
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::default());
    let reg = env.register_managed_service("gone", service.clone());
    assert_eq!(env.connection.tracked_count(), 1);
    let config = env.admin.get_configuration("gone").unwrap();
    config.update(numbered(1)).unwrap().wait();

    reg.unregister().unwrap();
    assert_eq!(env.connection.tracked_count(), 0);
    config.update(numbered(2)).unwrap().wait();
    assert_eq!(service.calls(), vec![Some(numbered(1))]);
}

#[test]
fn static_configurations_follow_the_module() {
    let env = TestEnv::new();
    let service = Arc::new(RecordingService::default());
    let _reg = env.register_managed_service("static.pid", service.clone());

    let header = json!({
        "version": 1,
        "configurations": [
            {"pid": "static.pid", "properties": {"anInt": 5}},
            {"pid": "kept.pid", "properties": {"x": true}},
        ]
    });
    let module = env
        .framework
        .modules()
        .start_module(ModuleDescriptor::new("with-config").with_header("cm", header));
    env.settle();

    assert_eq!(service.calls(), vec![Some(Properties::new().with("anInt", 5))]);
    assert_eq!(env.admin.list_configurations(None).len(), 2);

    // A configuration changed after it was added survives the module.
    let kept = env.admin.get_configuration("kept.pid").unwrap();
    kept.update(Properties::new().with("x", false)).unwrap().wait();

    env.framework.modules().stop_module(module.id()).unwrap();
    env.settle();

    assert_eq!(service.calls(), vec![Some(Properties::new().with("anInt", 5)), None]);
    assert_eq!(env.admin.list_configurations(None), vec![kept]);
}
