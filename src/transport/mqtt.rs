use anyhow::{anyhow, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::endpoint::{MqttEndpoint, TlsMaterials};
use crate::publisher::Broker;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const REQUEST_QUEUE: usize = 64;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

/// `rumqttc` client plus the thread that drives its event loop.
///
/// Publishes are queued with `try_publish`: a full request queue (broker
/// down for a while) surfaces as a publish error instead of blocking the
/// cycle. The event loop reconnects on its own after a backoff.
pub struct MqttBroker {
    client: Client,
    shutdown: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = &settings.endpoint;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        options.set_transport(endpoint.transport(&settings.tls)?);

        let (client, connection) = Client::new(options, REQUEST_QUEUE);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_loop = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("mqtt-event-loop".to_string())
            .spawn(move || drive_connection(connection, shutdown_loop))?;

        log::info!(
            "MQTT client started for {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            shutdown,
            connection_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn disconnect(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT disconnect request failed: {}", e);
        }
        let handle = self
            .connection_handle
            .lock()
            .map_err(|_| anyhow!("mqtt connection handle lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("mqtt event loop thread panicked"))?;
        }
        Ok(())
    }
}

fn drive_connection(mut connection: Connection, shutdown: Arc<AtomicBool>) {
    for event in connection.iter() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("Connected to MQTT broker");
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }
    log::debug!("MQTT event loop stopped");
}

impl Broker for MqttBroker {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))
    }
}
