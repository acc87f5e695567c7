//! Host collaborators: device registry, settings and tracked entities.
//!
//! The bridge never discovers cameras itself. It asks the host for the
//! device list and for the adaptive streaming settings on every cycle.
//! Two adapters are provided:
//! - [`HostApiClient`]: loopback HTTP/JSON API exposed by the host
//! - [`StaticHost`]: in-memory state, optionally loaded from a JSON snapshot

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::TrackedEntity;
use crate::matcher::SettingEntry;

/// Interface name carried by every camera device.
pub const VIDEO_CAMERA_INTERFACE: &str = "VideoCamera";

const TOKEN_HEADER: &str = "x-host-token";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "capabilities")]
    pub interfaces: Vec<String>,
}

impl DeviceSummary {
    pub fn is_camera(&self) -> bool {
        self.interfaces.iter().any(|i| i == VIDEO_CAMERA_INTERFACE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDetails {
    pub name: String,
}

pub trait DeviceRegistry: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceSummary>>;
    fn get_device(&self, id: &str) -> Result<DeviceDetails>;
}

/// Source of the adaptive streaming settings list.
pub trait SettingsProvider: Send + Sync {
    fn get_settings(&self) -> Result<Vec<SettingEntry>>;
}

/// Source of the tracked entities and their IP prefixes.
pub trait EntityProvider: Send + Sync {
    fn tracked_entities(&self) -> Result<Vec<TrackedEntity>>;
}

impl EntityProvider for Vec<TrackedEntity> {
    fn tracked_entities(&self) -> Result<Vec<TrackedEntity>> {
        Ok(self.clone())
    }
}

/// Client for the host's loopback JSON API.
///
/// Endpoints:
/// - `GET /devices` -> `[{id, name, interfaces}]`
/// - `GET /devices/{id}` -> `{name}`
/// - `GET /devices/by-name/{name}/settings` -> `[SettingEntry]`
#[derive(Clone, Debug)]
pub struct HostApiClient {
    addr: SocketAddr,
    token: Option<String>,
    settings_device: String,
}

impl HostApiClient {
    pub fn new(addr: SocketAddr, token: Option<String>, settings_device: impl Into<String>) -> Self {
        Self {
            addr,
            token,
            settings_device: settings_device.into(),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = http_get(self.addr, path, self.token.as_deref())?;
        serde_json::from_slice(&body).with_context(|| format!("failed to parse {} response", path))
    }
}

impl DeviceRegistry for HostApiClient {
    fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        self.get_json("/devices")
    }

    fn get_device(&self, id: &str) -> Result<DeviceDetails> {
        self.get_json(&format!("/devices/{}", encode_path_segment(id)))
    }
}

impl SettingsProvider for HostApiClient {
    fn get_settings(&self) -> Result<Vec<SettingEntry>> {
        self.get_json(&format!(
            "/devices/by-name/{}/settings",
            encode_path_segment(&self.settings_device)
        ))
    }
}

fn http_get(addr: SocketAddr, path: &str, token: Option<&str>) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("failed to connect to host api {}", addr))?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    // HTTP/1.0 keeps the response body unchunked.
    let mut request = format!("GET {} HTTP/1.0\r\nHost: {}\r\n", path, addr);
    if let Some(token) = token {
        request.push_str(&format!("{}: {}\r\n", TOKEN_HEADER, token));
    }
    request.push_str("Connection: close\r\n\r\n");
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    split_http_response(&response, path).map(|body| body.to_vec())
}

fn split_http_response<'a>(response: &'a [u8], path: &str) -> Result<&'a [u8]> {
    let header_end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("invalid http response for {}", path))?;
    let (header, body) = response.split_at(header_end + 4);
    let header_text = String::from_utf8_lossy(header);
    let status_line = header_text
        .lines()
        .next()
        .ok_or_else(|| anyhow!("missing status line"))?;
    let status_code = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("missing status code"))?;
    if status_code != "200" {
        return Err(anyhow!("host api {} returned status {}", path, status_code));
    }
    Ok(body)
}

fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// JSON shape of a host snapshot file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub devices: Vec<DeviceSummary>,
    #[serde(default)]
    pub settings: Vec<SettingEntry>,
}

/// In-memory host. State can be swapped between cycles.
#[derive(Debug, Default)]
pub struct StaticHost {
    state: RwLock<HostSnapshot>,
}

impl StaticHost {
    pub fn new(snapshot: HostSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host snapshot {}", path.display()))?;
        let snapshot: HostSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("invalid host snapshot {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    pub fn set_settings(&self, settings: Vec<SettingEntry>) -> Result<()> {
        self.write()?.settings = settings;
        Ok(())
    }

    pub fn set_devices(&self, devices: Vec<DeviceSummary>) -> Result<()> {
        self.write()?.devices = devices;
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HostSnapshot>> {
        self.state
            .read()
            .map_err(|_| anyhow!("static host lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HostSnapshot>> {
        self.state
            .write()
            .map_err(|_| anyhow!("static host lock poisoned"))
    }
}

impl DeviceRegistry for StaticHost {
    fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        Ok(self.read()?.devices.clone())
    }

    fn get_device(&self, id: &str) -> Result<DeviceDetails> {
        self.read()?
            .devices
            .iter()
            .find(|device| device.id == id)
            .map(|device| DeviceDetails {
                name: device.name.clone(),
            })
            .ok_or_else(|| anyhow!("unknown device {}", id))
    }
}

impl SettingsProvider for StaticHost {
    fn get_settings(&self) -> Result<Vec<SettingEntry>> {
        Ok(self.read()?.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn serve_once(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        addr
    }

    #[test]
    fn camera_detection_uses_interfaces() {
        let json = r#"[{"id":"1","name":"Front","interfaces":["VideoCamera","Settings"]},
                       {"id":"2","name":"Light","capabilities":["OnOff"]}]"#;
        let devices: Vec<DeviceSummary> = serde_json::from_str(json).unwrap();
        assert!(devices[0].is_camera());
        assert!(!devices[1].is_camera());
        assert_eq!(devices[1].interfaces, vec!["OnOff"]);
    }

    #[test]
    fn encode_path_segment_escapes_spaces() {
        assert_eq!(encode_path_segment("Adaptive Streaming"), "Adaptive%20Streaming");
        assert_eq!(encode_path_segment("cam-1_a"), "cam-1_a");
        assert_eq!(encode_path_segment("a/b"), "a%2Fb");
    }

    #[test]
    fn split_http_response_rejects_errors() {
        let ok = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n[]";
        assert_eq!(split_http_response(ok, "/devices").unwrap(), b"[]");

        let missing = b"HTTP/1.0 404 Not Found\r\n\r\n";
        let err = split_http_response(missing, "/devices/9").unwrap_err();
        assert!(err.to_string().contains("404"));

        assert!(split_http_response(b"garbage", "/devices").is_err());
    }

    #[test]
    fn host_api_client_fetches_devices() {
        let addr = serve_once(
            "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n\
             [{\"id\":\"7\",\"name\":\"Porch\",\"interfaces\":[\"VideoCamera\"]}]",
        );
        let client = HostApiClient::new(addr, Some("secret".to_string()), "Adaptive Streaming");
        let devices = client.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "7");
        assert!(devices[0].is_camera());
    }

    #[test]
    fn host_api_client_surfaces_status_errors() {
        let addr = serve_once("HTTP/1.0 500 Internal Server Error\r\n\r\n");
        let client = HostApiClient::new(addr, None, "Adaptive Streaming");
        let err = client.get_settings().unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn static_host_looks_up_devices() {
        let host = StaticHost::new(HostSnapshot {
            devices: vec![DeviceSummary {
                id: "1".to_string(),
                name: "Front".to_string(),
                interfaces: vec![VIDEO_CAMERA_INTERFACE.to_string()],
            }],
            settings: Vec::new(),
        });
        assert_eq!(host.get_device("1").unwrap().name, "Front");
        assert!(host.get_device("2").is_err());
    }

    #[test]
    fn static_host_loads_snapshot_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp snapshot");
        std::io::Write::write_all(
            &mut file,
            br#"{
                "devices": [{"id": "1", "name": "Front", "interfaces": ["VideoCamera"]}],
                "settings": [{"group": "Front", "subgroup": "10.0.0.5:1", "key": "type", "title": "Type", "value": "webrtc"}]
            }"#,
        )
        .expect("write snapshot");
        let host = StaticHost::from_json_file(file.path()).unwrap();
        assert_eq!(host.list_devices().unwrap().len(), 1);
        assert_eq!(host.get_settings().unwrap()[0].subgroup.as_deref(), Some("10.0.0.5:1"));
    }
}
