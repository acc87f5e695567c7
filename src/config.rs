use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::topics::{
    validate_prefix, validate_topic_name, DEFAULT_DISCOVERY_PREFIX, DEFAULT_STATE_PREFIX,
};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_SETTINGS_DEVICE: &str = "Adaptive Streaming";

/// A tracked person and the IP prefixes their devices connect from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub name: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    state_prefix: Option<String>,
    discovery_prefix: Option<String>,
    poll_interval_secs: Option<u64>,
    discovery: Option<bool>,
    cameras: Option<Vec<String>>,
    entities: Option<Vec<TrackedEntity>>,
    adaptive_streaming_device: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub state_prefix: String,
    pub discovery_prefix: String,
    pub poll_interval: Duration,
    pub discovery: bool,
    /// Whitelisted camera ids.
    pub cameras: Vec<String>,
    pub entities: Vec<TrackedEntity>,
    pub settings_device: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            state_prefix: DEFAULT_STATE_PREFIX.to_string(),
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            discovery: true,
            cameras: Vec::new(),
            entities: Vec::new(),
            settings_device: DEFAULT_SETTINGS_DEVICE.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load from `path`, or from `ACTIVE_STREAMS_CONFIG` when no path is
    /// given, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("ACTIVE_STREAMS_CONFIG").ok();
        let path = path.or(env_path.as_deref().map(Path::new));
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            state_prefix: file.state_prefix.unwrap_or(defaults.state_prefix),
            discovery_prefix: file.discovery_prefix.unwrap_or(defaults.discovery_prefix),
            poll_interval: file
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            discovery: file.discovery.unwrap_or(defaults.discovery),
            cameras: file.cameras.unwrap_or_default(),
            entities: file.entities.unwrap_or_default(),
            settings_device: file
                .adaptive_streaming_device
                .unwrap_or(defaults.settings_device),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(prefix) = std::env::var("ACTIVE_STREAMS_STATE_PREFIX") {
            if !prefix.trim().is_empty() {
                self.state_prefix = prefix.trim().to_string();
            }
        }
        if let Ok(cameras) = std::env::var("ACTIVE_STREAMS_CAMERAS") {
            let parsed = split_csv(&cameras);
            if !parsed.is_empty() {
                self.cameras = parsed;
            }
        }
        if let Ok(secs) = std::env::var("ACTIVE_STREAMS_POLL_SECS") {
            let seconds: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("ACTIVE_STREAMS_POLL_SECS must be an integer number of seconds")
            })?;
            self.poll_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Validate names so topic concatenation stays collision-free.
    pub fn validate(&mut self) -> Result<()> {
        validate_prefix("state prefix", &self.state_prefix)?;
        validate_prefix("discovery prefix", &self.discovery_prefix)?;

        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }

        let mut cameras = HashSet::new();
        for camera in &self.cameras {
            validate_topic_name("camera id", camera)?;
            cameras.insert(camera.as_str());
        }

        let mut names = HashSet::new();
        for entity in &mut self.entities {
            validate_topic_name("entity name", &entity.name)?;
            if !names.insert(entity.name.clone()) {
                return Err(anyhow!("entity '{}' is configured twice", entity.name));
            }
            if cameras.contains(entity.name.as_str()) {
                return Err(anyhow!(
                    "entity '{}' shares its name with a whitelisted camera id",
                    entity.name
                ));
            }
            entity.ips = entity
                .ips
                .iter()
                .map(|ip| ip.trim())
                .filter(|ip| !ip.is_empty())
                .map(|ip| ip.to_string())
                .collect();
        }
        Ok(())
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
