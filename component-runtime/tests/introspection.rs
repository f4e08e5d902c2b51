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

use component_runtime::{
    Cardinality, ComponentDescriptionDto, ComponentState, ReferencePolicy, RuntimeError,
};
use framework::Properties;
use helpers::{Recorder, TestEnv, TIMEOUT};
use serde_json::json;

fn manifest() -> serde_json::Value {
    json!([
        {
            "implementation-class": "test::Consumer",
            "name": "consumer",
            "properties": {"colour": "blue"},
            "references": [{
                "name": "x",
                "interface": "::test::X",
                "cardinality": "1..n",
                "policy": "dynamic",
                "target": "(kind=a)",
            }],
        },
        {
            "implementation-class": "test::Provider",
            "name": "provider",
            "immediate": false,
            "service": {"interfaces": ["test::Y"], "scope": "singleton"},
        },
    ])
}

#[test]
fn descriptions_of_loaded_components() {
    let env = TestEnv::new();
    let recorder = Recorder::new();
    let factories =
        [("test::Consumer", recorder.factory()), ("test::Provider", recorder.factory())];
    let module = env.start_module("m", manifest(), &factories);

    let descriptions = env.runtime.component_description_dtos(&[]);
    let names: Vec<&str> = descriptions.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["consumer", "provider"]);
    assert_eq!(env.runtime.component_description_dtos(&[module.id()]), descriptions);

    let consumer = env.runtime.component_description_dto(module.id(), "consumer");
    assert_eq!(consumer.module.id, module.id().value());
    assert_eq!(consumer.module.name, "m");
    assert!(consumer.immediate);
    assert!(consumer.default_enabled);
    assert_eq!(consumer.properties.get("colour").and_then(|v| v.as_str()), Some("blue"));
    let reference = &consumer.references[0];
    assert_eq!(reference.interface, "test::X");
    assert_eq!(reference.cardinality, Cardinality::OneToMany);
    assert_eq!(reference.policy, ReferencePolicy::Dynamic);
    assert_eq!(reference.target.as_deref(), Some("(kind=a)"));

    let provider = env.runtime.component_description_dto(module.id(), "provider");
    assert!(!provider.immediate);
    assert_eq!(provider.service_interfaces, ["test::Y"]);

    let json = serde_json::to_value(&consumer).unwrap();
    assert_eq!(json["references"][0]["cardinality"], "1..n");
}

#[test]
fn configuration_dtos_split_references() {
    let env = TestEnv::new();
    let recorder = Recorder::new();
    let factories =
        [("test::Consumer", recorder.factory()), ("test::Provider", recorder.factory())];
    let module = env.start_module("m", manifest(), &factories);
    let description = env.runtime.component_description_dto(module.id(), "consumer");

    let wrong = env.register("test::X", Properties::new().with("kind", "b"));
    let dtos = env.runtime.component_configuration_dtos(&description).unwrap();
    assert_eq!(dtos.len(), 1);
    assert_eq!(dtos[0].state, ComponentState::UnsatisfiedReference);
    assert!(dtos[0].satisfied_references.is_empty());
    assert_eq!(dtos[0].unsatisfied_references[0].name, "x");
    assert_eq!(dtos[0].properties.get("colour").and_then(|v| v.as_str()), Some("blue"));
    assert_eq!(serde_json::to_value(&dtos[0]).unwrap()["state"], "UNSATISFIED_REFERENCE");

    let right = env.register("test::X", Properties::new().with("kind", "a"));
    let configuration = env.configuration(&module, "consumer");
    env.wait_state(&configuration, ComponentState::Active);

    let dtos = env.runtime.component_configuration_dtos(&description).unwrap();
    assert_eq!(dtos[0].state, ComponentState::Active);
    assert!(dtos[0].unsatisfied_references.is_empty());
    let bound: Vec<u64> =
        dtos[0].satisfied_references[0].bound_services.iter().map(|s| s.id).collect();
    assert_eq!(bound, [right.reference().id().value()]);
    assert_ne!(bound, [wrong.reference().id().value()]);
}

#[test]
fn unknown_components() {
    let env = TestEnv::new();
    let module = env.start_module("m", json!([]), &[]);

    let unknown = env.runtime.component_description_dto(module.id(), "nothing");
    assert_eq!(unknown, ComponentDescriptionDto::default());

    let missing = ComponentDescriptionDto {
        name: "nothing".to_owned(),
        ..Default::default()
    };
    assert!(matches!(
        env.runtime.component_configuration_dtos(&missing),
        Err(RuntimeError::NotFound { .. })
    ));
    assert!(matches!(
        env.runtime.is_component_enabled(&missing),
        Err(RuntimeError::NotFound { .. })
    ));
    assert!(matches!(
        env.runtime.enable_component(&missing),
        Err(RuntimeError::NotFound { .. })
    ));
    assert!(matches!(
        env.runtime.disable_component(&missing),
        Err(RuntimeError::NotFound { .. })
    ));

    // Components are looked up by module and name together.
    let manifest = json!([{"implementation-class": "test::C", "name": "c"}]);
    let other = env.start_module("n", manifest, &[]);
    let description = env.runtime.component_description_dto(other.id(), "c");
    assert_eq!(description.module.id, other.id().value());
    assert!(env.runtime.is_component_enabled(&description).unwrap());
    let mut elsewhere = description.clone();
    elsewhere.module.id = module.id().value();
    assert!(matches!(
        env.runtime.is_component_enabled(&elsewhere),
        Err(RuntimeError::NotFound { .. })
    ));
}

#[test]
fn enable_and_disable_through_descriptions() {
    let env = TestEnv::new();
    let recorder = Recorder::new();
    let factories =
        [("test::Consumer", recorder.factory()), ("test::Provider", recorder.factory())];
    let module = env.start_module("m", manifest(), &factories);
    let description = env.runtime.component_description_dto(module.id(), "provider");
    assert!(env.runtime.is_component_enabled(&description).unwrap());

    assert!(env.runtime.disable_component(&description).unwrap().wait_timeout(TIMEOUT));
    assert!(!env.runtime.is_component_enabled(&description).unwrap());
    assert!(env.runtime.component_configuration_dtos(&description).unwrap().is_empty());
    assert!(env.framework.services().get_service_reference("test::Y").is_none());

    assert!(env.runtime.enable_component(&description).unwrap().wait_timeout(TIMEOUT));
    assert!(env.runtime.is_component_enabled(&description).unwrap());
    let dtos = env.runtime.component_configuration_dtos(&description).unwrap();
    assert_eq!(dtos[0].state, ComponentState::Satisfied);
    assert!(env.framework.services().get_service_reference("test::Y").is_some());

    env.runtime.stop();
    assert!(matches!(
        env.runtime.enable_component(&description),
        Err(RuntimeError::Stopped)
    ));
}

#[test]
fn broken_descriptions_are_skipped() {
    let env = TestEnv::new();
    let recorder = Recorder::new();
    let manifest = json!([
        {"name": "no-class"},
        {"implementation-class": "test::C", "name": "good"},
        {"implementation-class": "test::C", "name": "good"},
        {"implementation-class": "test::C", "name": "lazy", "immediate": false},
    ]);
    let module = env.start_module("m", manifest, &[("test::C", recorder.factory())]);
    let descriptions = env.runtime.component_description_dtos(&[module.id()]);
    let names: Vec<String> = descriptions.into_iter().map(|d| d.name).collect();
    assert_eq!(names, ["good"]);
}

#[test]
fn invalid_envelope_loads_nothing() {
    let env = TestEnv::new();
    let descriptor = framework::ModuleDescriptor::new("bad").with_header(
        component_runtime::SCR_HEADER,
        json!({"version": 99, "components": [{"implementation-class": "test::C"}]}),
    );
    let module = env.framework.modules().start_module(descriptor);
    assert!(env.runtime.component_description_dtos(&[module.id()]).is_empty());
    // The module can still be stopped cleanly.
    env.stop_module(&module);
}
