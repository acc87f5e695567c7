//! Topic naming for active stream sensors.
//!
//! Every published fact lives under `<ns>/activeStreams`. The scope of the
//! fact decides the rest of the path:
//!
//! | Scope           | State topic                            | Discovery component |
//! |-----------------|----------------------------------------|---------------------|
//! | Global          | `<ns>/activeStreams`                   | `sensor`            |
//! | Camera          | `<ns>/activeStreams/{camera}`          | `sensor`            |
//! | Entity          | `<ns>/activeStreams/{entity}`          | `sensor`            |
//! | Camera + Entity | `<ns>/activeStreams/{camera}/{entity}` | `binary_sensor`     |
//!
//! Each state topic has an `/info` sibling carrying the JSON detail payload.
//! Topics are built by plain concatenation, so camera ids and entity names
//! must pass [`validate_topic_name`] before they reach the namer.

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub const DEFAULT_STATE_PREFIX: &str = "scrypted";
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

const ROOT_SEGMENT: &str = "activeStreams";
const INFO_SUFFIX: &str = "info";

/// Which fact a topic triple belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicScope<'a> {
    Global,
    Camera(&'a str),
    Entity(&'a str),
    CameraEntity { camera: &'a str, entity: &'a str },
}

impl<'a> TopicScope<'a> {
    pub fn from_parts(camera: Option<&'a str>, entity: Option<&'a str>) -> Self {
        match (camera, entity) {
            (None, None) => Self::Global,
            (Some(camera), None) => Self::Camera(camera),
            (None, Some(entity)) => Self::Entity(entity),
            (Some(camera), Some(entity)) => Self::CameraEntity { camera, entity },
        }
    }

    /// Home Assistant component used for discovery.
    pub fn component(&self) -> &'static str {
        match self {
            Self::CameraEntity { .. } => "binary_sensor",
            _ => "sensor",
        }
    }
}

/// The three topics that describe one fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topics {
    pub state: String,
    pub info: String,
    pub discovery: String,
}

#[derive(Clone, Debug)]
pub struct TopicNamer {
    state_prefix: String,
    discovery_prefix: String,
}

impl Default for TopicNamer {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_PREFIX, DEFAULT_DISCOVERY_PREFIX)
    }
}

impl TopicNamer {
    pub fn new(state_prefix: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self {
            state_prefix: state_prefix.into(),
            discovery_prefix: discovery_prefix.into(),
        }
    }

    pub fn state_prefix(&self) -> &str {
        &self.state_prefix
    }

    /// Topics for an optional camera id and an optional entity name.
    pub fn topics(&self, camera: Option<&str>, entity: Option<&str>) -> Topics {
        self.for_scope(TopicScope::from_parts(camera, entity))
    }

    pub fn for_scope(&self, scope: TopicScope<'_>) -> Topics {
        let ns = &self.state_prefix;
        let root = format!("{}/{}", ns, ROOT_SEGMENT);
        let (state, node, object) = match scope {
            TopicScope::Global => (
                root,
                format!("{}-active-streams", ns),
                "ActiveStreams",
            ),
            TopicScope::Camera(camera) => (
                format!("{}/{}", root, camera),
                format!("{}-active-streams-{}", ns, camera),
                "ActiveStreams",
            ),
            TopicScope::Entity(entity) => (
                format!("{}/{}", root, entity),
                format!("{}-active-stream-{}", ns, entity),
                "ActiveStream",
            ),
            TopicScope::CameraEntity { camera, entity } => (
                format!("{}/{}/{}", root, camera, entity),
                format!("{}-active-stream-{}-{}", ns, camera, entity),
                "ActiveStream",
            ),
        };
        let info = format!("{}/{}", state, INFO_SUFFIX);
        let discovery = format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix,
            scope.component(),
            node,
            object
        );
        Topics {
            state,
            info,
            discovery,
        }
    }
}

/// Check that a camera id or entity name is safe to splice into a topic.
///
/// Names are limited to `[A-Za-z0-9_]{1,64}`, which rules out the `/`
/// separator and the `+`/`#` wildcards. `-` is excluded because it joins
/// camera id and entity name inside discovery node ids. `info` is reserved
/// for detail topics.
pub fn validate_topic_name(kind: &str, name: &str) -> Result<()> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_]{1,64}$").expect("static topic name regex")
    });
    if !re.is_match(name) {
        return Err(anyhow!(
            "{} '{}' must match ^[A-Za-z0-9_]{{1,64}}$",
            kind,
            name
        ));
    }
    if name.eq_ignore_ascii_case(INFO_SUFFIX) {
        return Err(anyhow!("{} '{}' is reserved for detail topics", kind, name));
    }
    Ok(())
}

/// Check a topic prefix: non-empty and free of wildcards.
pub fn validate_prefix(kind: &str, prefix: &str) -> Result<()> {
    if prefix.trim().is_empty() {
        return Err(anyhow!("{} must not be empty", kind));
    }
    if prefix.contains(['+', '#']) || prefix.starts_with('/') || prefix.ends_with('/') {
        return Err(anyhow!(
            "{} '{}' must not contain MQTT wildcards or leading/trailing '/'",
            kind,
            prefix
        ));
    }
    Ok(())
}
