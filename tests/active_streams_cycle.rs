use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use active_streams::config::{BridgeConfig, TrackedEntity};
use active_streams::host::{DeviceSummary, HostSnapshot, StaticHost};
use active_streams::matcher::SettingEntry;
use active_streams::publisher::MemoryBroker;
use active_streams::{Collaborators, Orchestrator, TickOutcome};

fn snapshot() -> HostSnapshot {
    serde_json::from_value(json!({
        "devices": [
            { "id": "cam1", "name": "Front Door", "interfaces": ["VideoCamera", "Settings"] },
            { "id": "cam2", "name": "Backyard", "interfaces": ["VideoCamera"] },
            { "id": "hub", "name": "Hub", "interfaces": ["Settings"] }
        ],
        "settings": [
            { "group": "Front Door", "subgroup": "192.168.1.10:51234", "key": "type", "title": "Type", "value": "webrtc" },
            { "group": "Front Door", "key": "activeStreams", "title": "Active Streams", "value": 1 },
            { "group": "Backyard", "key": "activeStreams", "title": "Active Streams", "value": "0" }
        ]
    }))
    .expect("snapshot json")
}

fn orchestrator(host: Arc<StaticHost>, broker: Arc<MemoryBroker>, discovery: bool) -> Orchestrator {
    let cfg = BridgeConfig {
        cameras: vec!["cam1".to_string()],
        entities: vec![TrackedEntity {
            name: "Alice".to_string(),
            ips: vec!["192.168.1".to_string()],
        }],
        discovery,
        ..BridgeConfig::default()
    };
    Orchestrator::new(
        Collaborators {
            registry: host.clone(),
            settings: host,
            entities: Arc::new(cfg.entities.clone()),
            broker,
        },
        &cfg,
    )
}

fn published(broker: &MemoryBroker) -> HashMap<String, String> {
    broker
        .messages()
        .into_iter()
        .map(|m| (m.topic, m.payload))
        .collect()
}

#[test]
fn whitelisted_camera_with_known_viewer() {
    let host = Arc::new(StaticHost::new(snapshot()));
    let broker = Arc::new(MemoryBroker::new());
    let orchestrator = orchestrator(host, broker.clone(), false);

    assert!(matches!(orchestrator.tick(), TickOutcome::Completed(_)));

    let sent = published(&broker);
    assert_eq!(sent["scrypted/activeStreams/cam1/Alice"], "true");
    assert_eq!(sent["scrypted/activeStreams/cam1"], "1");
    assert_eq!(sent["scrypted/activeStreams/Alice"], "1");
    assert_eq!(sent["scrypted/activeStreams"], "1");
    assert!(broker.messages().iter().all(|m| m.retain));
}

#[test]
fn second_cycle_with_identical_inputs_writes_nothing() {
    let host = Arc::new(StaticHost::new(snapshot()));
    let broker = Arc::new(MemoryBroker::new());
    let orchestrator = orchestrator(host, broker.clone(), true);

    orchestrator.tick();
    let first = broker.take();
    // 4 facts with detail + 4 discovery configs
    assert_eq!(first.len(), 12);

    orchestrator.tick();
    assert!(broker.is_empty());
}

#[test]
fn snapshot_file_drives_a_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("host.json");
    std::fs::write(&path, serde_json::to_vec(&snapshot()).expect("encode")).expect("write");

    let host = Arc::new(StaticHost::from_json_file(&path).expect("load snapshot"));
    let broker = Arc::new(MemoryBroker::new());
    let orchestrator = orchestrator(host.clone(), broker.clone(), false);
    orchestrator.tick();
    broker.take();

    host.set_devices(vec![
        DeviceSummary {
            id: "cam1".to_string(),
            name: "Front Door".to_string(),
            interfaces: vec!["VideoCamera".to_string()],
        },
        DeviceSummary {
            id: "cam3".to_string(),
            name: "Side Gate".to_string(),
            interfaces: vec!["VideoCamera".to_string()],
        },
    ])
    .expect("set devices");
    let mut settings = snapshot().settings;
    settings.push(SettingEntry {
        group: "Side Gate".to_string(),
        subgroup: None,
        key: "activeStreams".to_string(),
        title: "Active Streams".to_string(),
        value: json!(2),
    });
    host.set_settings(settings).expect("set settings");

    orchestrator.tick();
    let sent = published(&broker);
    // Only the global total moved.
    assert_eq!(sent.len(), 2);
    assert_eq!(sent["scrypted/activeStreams"], "3");
}
