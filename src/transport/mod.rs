//! MQTT transport for the bridge.
//!
//! - `endpoint`: broker address parsing, loopback policy, TLS materials
//! - `mqtt`: the `rumqttc`-backed [`crate::publisher::Broker`]

mod endpoint;
mod mqtt;

pub use endpoint::{parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint, TlsMaterials};
pub use mqtt::{MqttBroker, MqttSettings};
