//! Home Assistant MQTT discovery for active stream sensors.
//!
//! Discovery is announced once per process. The documents are retained on
//! the broker, so a restart re-announces the same payloads harmlessly.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::publisher::Broker;
use crate::topics::{TopicNamer, Topics};

const ATTRIBUTES_TEMPLATE: &str = "{{ value_json | tojson }}";
const DEVICE_NAME: &str = "Scrypted Active streams info";

/// Set once discovery has been fully announced.
#[derive(Debug, Default)]
pub struct DiscoveryLatch {
    announced: bool,
}

impl DiscoveryLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.announced
    }

    fn set(&mut self) {
        self.announced = true;
    }
}

/// Device block shared by every discovery document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub ids: String,
    pub name: String,
}

impl DeviceDescriptor {
    pub fn for_prefix(state_prefix: &str) -> Self {
        Self {
            ids: format!("{}-activeStream", state_prefix),
            name: DEVICE_NAME.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveryDocument {
    pub state_topic: String,
    pub json_attributes_topic: String,
    pub json_attributes_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    pub dev: DeviceDescriptor,
    pub unique_id: String,
    pub name: String,
}

impl DiscoveryDocument {
    fn sensor(topics: &Topics, dev: &DeviceDescriptor, unique_id: String, name: String) -> Self {
        Self {
            state_topic: topics.state.clone(),
            json_attributes_topic: topics.info.clone(),
            json_attributes_template: ATTRIBUTES_TEMPLATE.to_string(),
            payload_on: None,
            payload_off: None,
            dev: dev.clone(),
            unique_id,
            name,
        }
    }

    fn binary_sensor(
        topics: &Topics,
        dev: &DeviceDescriptor,
        unique_id: String,
        name: String,
    ) -> Self {
        Self {
            payload_on: Some("true".to_string()),
            payload_off: Some("false".to_string()),
            ..Self::sensor(topics, dev, unique_id, name)
        }
    }
}

/// Camera identity as seen by the announcer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct DiscoveryAnnouncer {
    namer: TopicNamer,
    device: DeviceDescriptor,
    unique_prefix: String,
}

impl DiscoveryAnnouncer {
    pub fn new(namer: TopicNamer) -> Self {
        let device = DeviceDescriptor::for_prefix(namer.state_prefix());
        let unique_prefix = namer.state_prefix().to_string();
        Self {
            namer,
            device,
            unique_prefix,
        }
    }

    /// Every `(discovery topic, document)` pair for the given inputs.
    ///
    /// Order: per whitelisted camera its entity sensors then its own sensor,
    /// then one sensor per entity, then the global sensor.
    pub fn documents(
        &self,
        cameras: &[CameraRef],
        whitelisted_ids: &[String],
        entities: &[String],
    ) -> Vec<(String, DiscoveryDocument)> {
        let ns = &self.unique_prefix;
        let mut docs = Vec::new();

        for camera in cameras
            .iter()
            .filter(|camera| whitelisted_ids.contains(&camera.id))
        {
            for entity in entities {
                let topics = self.namer.topics(Some(camera.id.as_str()), Some(entity.as_str()));
                let doc = DiscoveryDocument::binary_sensor(
                    &topics,
                    &self.device,
                    format!("{}-active-stream-{}-{}", ns, camera.id, entity),
                    format!("{} {} active", camera.name, entity),
                );
                docs.push((topics.discovery, doc));
            }

            let topics = self.namer.topics(Some(camera.id.as_str()), None);
            let doc = DiscoveryDocument::sensor(
                &topics,
                &self.device,
                format!("{}-active-streams-{}", ns, camera.id),
                format!("{} active streams", camera.name),
            );
            docs.push((topics.discovery, doc));
        }

        for entity in entities {
            let topics = self.namer.topics(None, Some(entity.as_str()));
            let doc = DiscoveryDocument::sensor(
                &topics,
                &self.device,
                format!("{}-active-streams-{}", ns, entity),
                format!("{} active streams", entity),
            );
            docs.push((topics.discovery, doc));
        }

        let topics = self.namer.topics(None, None);
        let doc = DiscoveryDocument::sensor(
            &topics,
            &self.device,
            format!("{}-active-streams", ns),
            "All active streams".to_string(),
        );
        docs.push((topics.discovery, doc));

        docs
    }

    /// Publish all discovery documents unless `latch` is already set.
    ///
    /// Returns the number of documents written. Any publish error aborts the
    /// announcement and leaves the latch unset.
    pub fn announce(
        &self,
        latch: &mut DiscoveryLatch,
        broker: &dyn Broker,
        cameras: &[CameraRef],
        whitelisted_ids: &[String],
        entities: &[String],
    ) -> Result<usize> {
        if latch.is_set() {
            return Ok(0);
        }
        let docs = self.documents(cameras, whitelisted_ids, entities);
        for (topic, doc) in &docs {
            let payload = serde_json::to_vec(doc)?;
            broker
                .publish(topic, &payload, true)
                .with_context(|| format!("failed to publish discovery config {}", topic))?;
        }
        latch.set();
        log::info!("Published HA discovery for {} sensors", docs.len());
        Ok(docs.len())
    }
}
