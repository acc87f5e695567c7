//! Stream matching over the adaptive streaming settings list.
//!
//! The adaptive streaming device reports one group of settings per camera
//! (group = camera display name). Each live connection shows up as a set of
//! entries whose subgroup is `"<ip>:<connection-id>"`; the entry keyed
//! [`STREAM_KIND_KEY`] marks the connection itself. The camera-wide client
//! count is a separate entry titled [`ACTIVE_STREAMS_TITLE`].

use serde::{Deserialize, Serialize};

/// Key of the per-connection entry that identifies a stream record.
pub const STREAM_KIND_KEY: &str = "type";

/// Title of the per-camera client counter.
pub const ACTIVE_STREAMS_TITLE: &str = "Active Streams";

/// One setting as exposed by the host's settings interface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingEntry {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub subgroup: Option<String>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl SettingEntry {
    pub fn is_stream_record(&self) -> bool {
        self.key == STREAM_KIND_KEY
    }

    /// The subgroup with its trailing `:<connection-id>` segment removed.
    ///
    /// A subgroup without any `:` is all connection id and yields `""`.
    pub fn connection_ip(&self) -> Option<&str> {
        let subgroup = self.subgroup.as_deref()?;
        Some(match subgroup.rsplit_once(':') {
            Some((ip, _)) => ip,
            None => "",
        })
    }

    pub fn to_stream_info(&self) -> StreamInfo {
        StreamInfo {
            camera: self.group.clone(),
            ip: self.connection_ip().unwrap_or_default().to_string(),
        }
    }
}

/// One active connection attributed to a camera.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamInfo {
    pub camera: String,
    pub ip: String,
}

/// Detail payload published on every `/info` topic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDetail {
    pub streams: Vec<StreamInfo>,
}

impl StreamDetail {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        Self { streams }
    }
}

/// Entries belonging to one camera's group, in input order.
pub fn camera_entries<'a>(entries: &'a [SettingEntry], camera_name: &str) -> Vec<&'a SettingEntry> {
    entries
        .iter()
        .filter(|entry| entry.group == camera_name)
        .collect()
}

/// Streams whose connection IP starts with one of `ip_prefixes`.
///
/// Prefix matching lets an entity list a subnet such as `"192.168.1"`.
/// Input order is preserved; an empty prefix list never matches.
pub fn match_entity_streams<'a, I>(entries: I, ip_prefixes: &[String]) -> Vec<StreamInfo>
where
    I: IntoIterator<Item = &'a SettingEntry>,
{
    if ip_prefixes.is_empty() {
        return Vec::new();
    }
    entries
        .into_iter()
        .filter(|entry| entry.is_stream_record())
        .filter(|entry| match entry.connection_ip() {
            Some(ip) => ip_prefixes.iter().any(|prefix| ip.starts_with(prefix.as_str())),
            None => false,
        })
        .map(SettingEntry::to_stream_info)
        .collect()
}

/// Every stream record in `entries`, regardless of who owns it.
pub fn all_streams<'a, I>(entries: I) -> Vec<StreamInfo>
where
    I: IntoIterator<Item = &'a SettingEntry>,
{
    entries
        .into_iter()
        .filter(|entry| entry.is_stream_record())
        .map(SettingEntry::to_stream_info)
        .collect()
}

/// The camera's "Active Streams" counter, or 0 when absent or not numeric.
pub fn active_clients<'a, I>(entries: I) -> u64
where
    I: IntoIterator<Item = &'a SettingEntry>,
{
    entries
        .into_iter()
        .find(|entry| entry.title == ACTIVE_STREAMS_TITLE)
        .map(|entry| numeric_value(&entry.value))
        .unwrap_or(0)
}

fn numeric_value(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f >= 0.0)
                        .map(|f| f as u64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}
