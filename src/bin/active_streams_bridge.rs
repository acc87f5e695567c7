//! active_streams_bridge - Publish camera active stream state to MQTT.
//!
//! Every poll interval the bridge reads the host's camera list and the
//! adaptive streaming connection list, then publishes:
//! 1. Per whitelisted camera: active stream count and per-entity presence
//! 2. Per tracked entity: number of streams it has open
//! 3. Global: total active streams
//!
//! Only changed values are written. Home Assistant discovery configs are
//! published once per process unless disabled.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use active_streams::transport::{
    parse_mqtt_endpoint, validate_loopback_addr, MqttBroker, MqttSettings, TlsMaterials,
};
use active_streams::{
    BridgeConfig, Broker, Collaborators, DeviceRegistry, HostApiClient, MemoryBroker,
    Orchestrator, Scheduler, SettingsProvider, StaticHost, TickOutcome,
};

#[path = "../ui.rs"]
mod ui;

const BRIDGE_NAME: &str = "active_streams_bridge";
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish camera active stream state to MQTT with Home Assistant Discovery"
)]
struct Args {
    /// Bridge config file (JSON or TOML).
    #[arg(long, env = "ACTIVE_STREAMS_CONFIG")]
    config: Option<PathBuf>,

    /// Loopback address of the host API.
    #[arg(long, env = "HOST_API_ADDR", default_value = "127.0.0.1:10443")]
    host_api_addr: String,

    /// Path to the host API token file.
    #[arg(long, env = "HOST_API_TOKEN_PATH")]
    host_api_token_path: Option<PathBuf>,

    /// Host API token value (overrides token path).
    #[arg(long, env = "HOST_API_TOKEN")]
    host_api_token: Option<String>,

    /// Read devices and settings from a JSON snapshot instead of the host API.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Allow non-loopback MQTT connections.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (required for mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = BRIDGE_NAME)]
    mqtt_client_id: String,

    /// Log publishes instead of sending them to a broker.
    #[arg(long)]
    dry_run: bool,

    /// Disable Home Assistant discovery (overrides the config file).
    #[arg(long, env = "NO_DISCOVERY")]
    no_discovery: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(ui::UiMode::parse(&args.ui), std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("Load bridge config");
        BridgeConfig::load(args.config.as_deref())?
    };
    if args.no_discovery {
        cfg.discovery = false;
    }
    log::info!(
        "state prefix: {}, discovery: {}, interval: {}s, {} cameras whitelisted, {} entities tracked",
        cfg.state_prefix,
        if cfg.discovery { cfg.discovery_prefix.as_str() } else { "off" },
        cfg.poll_interval.as_secs(),
        cfg.cameras.len(),
        cfg.entities.len()
    );

    let (registry, settings) = host_collaborators(&args, &cfg)?;

    let mqtt = if args.dry_run {
        log::warn!("dry run: nothing is sent to the MQTT broker");
        None
    } else {
        let _stage = ui.stage("Connect to MQTT broker");
        Some(Arc::new(connect_broker(&args)?))
    };
    let broker: Arc<dyn Broker> = match &mqtt {
        Some(mqtt) => mqtt.clone() as Arc<dyn Broker>,
        None => Arc::new(MemoryBroker::new()),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Collaborators {
            registry,
            settings,
            entities: Arc::new(cfg.entities.clone()),
            broker,
        },
        &cfg,
    ));

    let result = if args.once {
        run_once(&orchestrator, &ui)
    } else {
        run_daemon(orchestrator, cfg.poll_interval)
    };

    if let Some(mqtt) = mqtt {
        mqtt.disconnect()?;
    }
    result
}

type HostPair = (Arc<dyn DeviceRegistry>, Arc<dyn SettingsProvider>);

fn host_collaborators(args: &Args, cfg: &BridgeConfig) -> Result<HostPair> {
    if let Some(path) = &args.snapshot {
        let host = Arc::new(StaticHost::from_json_file(path)?);
        log::info!("reading host state from snapshot {}", path.display());
        let registry: Arc<dyn DeviceRegistry> = host.clone();
        let settings: Arc<dyn SettingsProvider> = host;
        return Ok((registry, settings));
    }
    let addr = parse_loopback_socket_addr(&args.host_api_addr)
        .with_context(|| "host api addr must be loopback-only")?;
    let token = load_token(args.host_api_token_path.clone(), args.host_api_token.clone())?;
    let client = Arc::new(HostApiClient::new(addr, token, cfg.settings_device.clone()));
    let registry: Arc<dyn DeviceRegistry> = client.clone();
    let settings: Arc<dyn SettingsProvider> = client;
    Ok((registry, settings))
}

fn connect_broker(args: &Args) -> Result<MqttBroker> {
    let endpoint = parse_mqtt_endpoint(&args.mqtt_broker_addr, args.mqtt_use_tls)?;
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_deref(),
        args.mqtt_tls_client_cert_path.as_deref(),
        args.mqtt_tls_client_key_path.as_deref(),
    )?;
    if !args.allow_remote_mqtt {
        validate_loopback_addr(&endpoint, &args.mqtt_broker_addr)?;
    } else {
        log::warn!("Remote MQTT enabled - ensure broker is in a trusted network");
    }
    MqttBroker::connect(&MqttSettings {
        endpoint,
        tls,
        client_id: args.mqtt_client_id.clone(),
        username: args.mqtt_username.clone(),
        password: args.mqtt_password.clone(),
        keep_alive: MQTT_KEEP_ALIVE,
    })
}

fn run_once(orchestrator: &Orchestrator, ui: &ui::Ui) -> Result<()> {
    let _stage = ui.stage("Run active streams cycle");
    match orchestrator.tick() {
        TickOutcome::Completed(report) => {
            log::info!(
                "{} cameras, {} active streams, {} published, {} unchanged, {} failed",
                report.cameras,
                report.total_active,
                report.published,
                report.unchanged,
                report.failed
            );
            Ok(())
        }
        TickOutcome::Skipped => Err(anyhow!("cycle skipped")),
        TickOutcome::Failed => Err(anyhow!("active streams cycle failed")),
    }
}

fn run_daemon(orchestrator: Arc<Orchestrator>, interval: Duration) -> Result<()> {
    let handle = Scheduler::new(interval).spawn(orchestrator)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("{} running, waiting for shutdown signal (Ctrl-C)...", BRIDGE_NAME);
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping scheduler...");
    handle.stop()
}

fn load_token(path: Option<PathBuf>, token: Option<String>) -> Result<Option<String>> {
    if let Some(token) = token {
        let trimmed = token.trim().to_string();
        if trimmed.is_empty() {
            return Err(anyhow!("HOST_API_TOKEN is empty"));
        }
        return Ok(Some(trimmed));
    }
    let Some(path) = path else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read token file {}", path.display()))?;
    let token = contents.trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("token file {} is empty", path.display()));
    }
    Ok(Some(token))
}

fn parse_loopback_socket_addr(value: &str) -> Result<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        if addr.ip().is_loopback() {
            return Ok(addr);
        }
        return Err(anyhow!("address {} is not loopback", value));
    }
    if let Some(port) = value.strip_prefix("localhost:") {
        let port: u16 = port.parse().context("invalid port")?;
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
    }
    Err(anyhow!("unsupported host api address {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_socket_addr() {
        assert!(parse_loopback_socket_addr("127.0.0.1:10443").is_ok());
        assert_eq!(
            parse_loopback_socket_addr("localhost:80").unwrap().port(),
            80
        );
        assert!(parse_loopback_socket_addr("192.168.1.2:80").is_err());
        assert!(parse_loopback_socket_addr("example.com:80").is_err());
    }

    #[test]
    fn token_value_overrides_path() {
        let token = load_token(
            Some(PathBuf::from("/nonexistent/token")),
            Some(" secret \n".to_string()),
        )
        .unwrap();
        assert_eq!(token.as_deref(), Some("secret"));
        assert_eq!(load_token(None, None).unwrap(), None);
        assert!(load_token(None, Some("  ".to_string())).is_err());
    }

    #[test]
    fn token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "abc\n").unwrap();
        assert_eq!(load_token(Some(path), None).unwrap().as_deref(), Some("abc"));
    }
}
