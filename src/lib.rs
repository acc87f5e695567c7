//! Active stream state bridge.
//!
//! Periodically reads which clients are streaming from which cameras and
//! publishes the resulting facts to MQTT, with Home Assistant discovery.
//!
//! # Published facts
//!
//! Under the state prefix (default `scrypted`):
//!
//! - `<ns>/activeStreams`: total active streams across all cameras
//! - `<ns>/activeStreams/<camera>`: active streams on a whitelisted camera
//! - `<ns>/activeStreams/<entity>`: streams a tracked entity has open
//! - `<ns>/activeStreams/<camera>/<entity>`: whether the entity watches the camera
//!
//! Each state topic has an `/info` sibling carrying a JSON detail payload.
//! A fact is written only when its value differs from the last value
//! successfully published for that topic.
//!
//! # Module Structure
//!
//! - `topics`: topic naming and name validation
//! - `matcher`: stream record matching against entity IP prefixes
//! - `publisher`: change-gated publishing over a [`Broker`]
//! - `discovery`: Home Assistant discovery documents
//! - `cycle`: one poll cycle, with overlap protection
//! - `scheduler`: fixed-interval ticking
//! - `host`: collaborator traits and adapters
//! - `transport`: MQTT endpoint, TLS and the `rumqttc` broker
//! - `config`: bridge configuration file and environment overrides

pub mod config;
pub mod cycle;
pub mod discovery;
pub mod host;
pub mod matcher;
pub mod publisher;
pub mod scheduler;
pub mod topics;
pub mod transport;

pub use config::{BridgeConfig, TrackedEntity};
pub use cycle::{Collaborators, CycleReport, Orchestrator, TickOutcome};
pub use discovery::{DiscoveryAnnouncer, DiscoveryLatch};
pub use host::{
    DeviceDetails, DeviceRegistry, DeviceSummary, EntityProvider, HostApiClient, HostSnapshot,
    SettingsProvider, StaticHost,
};
pub use matcher::{SettingEntry, StreamDetail, StreamInfo};
pub use publisher::{Broker, ChangeGatedPublisher, MemoryBroker, PublishCache, PublishValue};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use topics::{TopicNamer, Topics};
