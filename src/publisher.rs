//! Change-gated state publication.
//!
//! Each fact is written as two messages: the raw value on the state topic,
//! then the JSON detail on its `/info` sibling. A fact is only written when
//! its value differs from the last value that was successfully written for
//! the same state topic. A failed write leaves the cached baseline alone so
//! the next cycle compares against it again.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::topics::Topics;

/// Minimal publish surface the core needs from an MQTT client.
///
/// Connection management, retries and timeouts belong to the implementor.
pub trait Broker: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;
}

/// Values carried on state topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishValue {
    Count(u64),
    Flag(bool),
}

impl fmt::Display for PublishValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{}", n),
            Self::Flag(b) => write!(f, "{}", b),
        }
    }
}

impl From<u64> for PublishValue {
    fn from(value: u64) -> Self {
        Self::Count(value)
    }
}

impl From<bool> for PublishValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Last successfully published value per state topic.
#[derive(Debug, Default)]
pub struct PublishCache {
    last: HashMap<String, PublishValue>,
}

impl PublishCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, state_topic: &str) -> Option<PublishValue> {
        self.last.get(state_topic).copied()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    fn is_current(&self, state_topic: &str, value: PublishValue) -> bool {
        self.last.get(state_topic) == Some(&value)
    }

    fn record(&mut self, state_topic: &str, value: PublishValue) {
        self.last.insert(state_topic.to_string(), value);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Unchanged,
    Failed,
}

/// Publisher bound to a broker and a cache owned by the caller.
pub struct ChangeGatedPublisher<'a> {
    broker: &'a dyn Broker,
    cache: &'a mut PublishCache,
    retain: bool,
}

impl<'a> ChangeGatedPublisher<'a> {
    pub fn new(broker: &'a dyn Broker, cache: &'a mut PublishCache) -> Self {
        Self {
            broker,
            cache,
            retain: true,
        }
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn publish<D: Serialize>(
        &mut self,
        topics: &Topics,
        value: impl Into<PublishValue>,
        detail: &D,
    ) -> PublishOutcome {
        let value = value.into();
        if self.cache.is_current(&topics.state, value) {
            return PublishOutcome::Unchanged;
        }
        match self.write(topics, value, detail) {
            Ok(()) => {
                self.cache.record(&topics.state, value);
                log::debug!("published {} = {}", topics.state, value);
                PublishOutcome::Published
            }
            Err(e) => {
                log::warn!("publish to {} failed: {:#}", topics.state, e);
                PublishOutcome::Failed
            }
        }
    }

    fn write<D: Serialize>(&self, topics: &Topics, value: PublishValue, detail: &D) -> Result<()> {
        let detail_json = serde_json::to_vec(detail)
            .map_err(|e| anyhow!("failed to serialize detail for {}: {}", topics.info, e))?;
        self.broker
            .publish(&topics.state, value.to_string().as_bytes(), self.retain)?;
        self.broker.publish(&topics.info, &detail_json, self.retain)?;
        Ok(())
    }
}

/// One message captured by [`MemoryBroker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// In-process broker that records every publish.
///
/// Used for dry runs and tests. Topics registered with
/// [`MemoryBroker::fail_topic`] reject publishes until cleared.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: Mutex<Vec<String>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_topic(&self, topic: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(topic.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .map(|mut messages| std::mem::take(&mut *messages))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Broker for MemoryBroker {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| anyhow!("memory broker lock poisoned"))?;
        if failing.iter().any(|t| t == topic) {
            return Err(anyhow!("broker rejected publish to {}", topic));
        }
        drop(failing);
        let payload = String::from_utf8_lossy(payload).into_owned();
        log::info!("[dry-run] {} <- {}", topic, payload);
        self.messages
            .lock()
            .map_err(|_| anyhow!("memory broker lock poisoned"))?
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                retain,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{StreamDetail, StreamInfo};
    use crate::topics::TopicNamer;

    fn detail() -> StreamDetail {
        StreamDetail::new(vec![StreamInfo {
            camera: "Front Door".to_string(),
            ip: "192.168.1.10".to_string(),
        }])
    }

    #[test]
    fn first_publish_writes_state_then_detail() {
        let broker = MemoryBroker::new();
        let mut cache = PublishCache::new();
        let topics = TopicNamer::default().topics(Some("cam1"), None);

        let outcome = ChangeGatedPublisher::new(&broker, &mut cache).publish(&topics, 1u64, &detail());
        assert_eq!(outcome, PublishOutcome::Published);

        let messages = broker.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "scrypted/activeStreams/cam1");
        assert_eq!(messages[0].payload, "1");
        assert_eq!(messages[1].topic, "scrypted/activeStreams/cam1/info");
        assert_eq!(
            messages[1].payload,
            r#"{"streams":[{"camera":"Front Door","ip":"192.168.1.10"}]}"#
        );
        assert!(messages.iter().all(|m| m.retain));
        assert_eq!(cache.get("scrypted/activeStreams/cam1"), Some(PublishValue::Count(1)));
    }

    #[test]
    fn falsy_first_values_still_publish() {
        let broker = MemoryBroker::new();
        let mut cache = PublishCache::new();
        let namer = TopicNamer::default();
        let mut publisher = ChangeGatedPublisher::new(&broker, &mut cache);

        assert_eq!(
            publisher.publish(&namer.topics(None, None), 0u64, &StreamDetail::default()),
            PublishOutcome::Published
        );
        assert_eq!(
            publisher.publish(&namer.topics(Some("1"), Some("Bob")), false, &StreamDetail::default()),
            PublishOutcome::Published
        );
        assert_eq!(broker.messages()[0].payload, "0");
        assert_eq!(broker.messages()[2].payload, "false");
    }

    #[test]
    fn writes_twice_per_value_change() {
        let broker = MemoryBroker::new();
        let mut cache = PublishCache::new();
        let topics = TopicNamer::default().topics(None, Some("Alice"));
        let sequence = [1u64, 1, 2, 2, 2, 0, 1, 1];
        let changes = 4; // 1, 2, 0, 1

        let mut publisher = ChangeGatedPublisher::new(&broker, &mut cache);
        for value in sequence {
            publisher.publish(&topics, value, &StreamDetail::default());
        }
        assert_eq!(broker.len(), 2 * changes);
    }

    #[test]
    fn flag_and_count_never_compare_equal() {
        assert_ne!(PublishValue::Flag(true), PublishValue::Count(1));
        assert_ne!(PublishValue::Flag(false), PublishValue::Count(0));
    }

    #[test]
    fn failed_state_write_keeps_old_baseline() {
        let broker = MemoryBroker::new();
        let mut cache = PublishCache::new();
        let topics = TopicNamer::default().topics(Some("cam1"), None);

        ChangeGatedPublisher::new(&broker, &mut cache).publish(&topics, 1u64, &detail());
        broker.take();

        broker.fail_topic(&topics.state);
        let outcome = ChangeGatedPublisher::new(&broker, &mut cache).publish(&topics, 2u64, &detail());
        assert_eq!(outcome, PublishOutcome::Failed);
        assert_eq!(cache.get(&topics.state), Some(PublishValue::Count(1)));
        assert!(broker.is_empty());

        broker.clear_failures();
        let outcome = ChangeGatedPublisher::new(&broker, &mut cache).publish(&topics, 2u64, &detail());
        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(cache.get(&topics.state), Some(PublishValue::Count(2)));
    }

    #[test]
    fn failed_detail_write_is_retried() {
        let broker = MemoryBroker::new();
        let mut cache = PublishCache::new();
        let topics = TopicNamer::default().topics(None, None);

        broker.fail_topic(&topics.info);
        let outcome = ChangeGatedPublisher::new(&broker, &mut cache).publish(&topics, 3u64, &detail());
        assert_eq!(outcome, PublishOutcome::Failed);
        assert!(cache.is_empty());
        // The state message went out before the detail write failed.
        assert_eq!(broker.take().len(), 1);

        broker.clear_failures();
        let outcome = ChangeGatedPublisher::new(&broker, &mut cache).publish(&topics, 3u64, &detail());
        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(broker.len(), 2);
    }

    #[test]
    fn retain_can_be_disabled() {
        let broker = MemoryBroker::new();
        let mut cache = PublishCache::new();
        let topics = TopicNamer::default().topics(None, None);
        ChangeGatedPublisher::new(&broker, &mut cache)
            .with_retain(false)
            .publish(&topics, 1u64, &detail());
        assert!(broker.messages().iter().all(|m| !m.retain));
    }
}
