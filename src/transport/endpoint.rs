use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

/// Broker host, port and whether to speak TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    pub fn is_loopback(&self) -> bool {
        let host = self.host.as_str();
        if host == "localhost" {
            return true;
        }
        host.parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    /// Build the rumqttc transport for this endpoint.
    ///
    /// Plain TCP refuses TLS materials. TLS without materials trusts the
    /// default roots; client certificates require an explicit CA.
    pub fn transport(&self, tls: &TlsMaterials) -> Result<Transport> {
        if !self.use_tls {
            if tls.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled (use --mqtt-use-tls or mqtts://)"
                ));
            }
            return Ok(Transport::tcp());
        }
        if !tls.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }
        let ca = tls.ca.clone().ok_or_else(|| {
            anyhow!("MQTT TLS CA certificate is required when providing client certificates")
        })?;
        Ok(Transport::tls(ca, tls.client_auth.clone(), None))
    }
}

/// PEM material for MQTT TLS.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key, always provided together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT TLS client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

/// Parse `host:port`, `[v6]:port`, or a `mqtt://` / `mqtts://` / `tcp://` /
/// `ssl://` URL. `tls_override` forces TLS for scheme-less addresses.
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = match remainder.strip_prefix('[') {
        Some(rest) => {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
            (host, port)
        }
        None => remainder
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?,
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }

    Ok(MqttEndpoint {
        host: host.to_string(),
        port,
        use_tls,
    })
}

/// Refuse non-loopback brokers unless explicitly allowed.
pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    if endpoint.is_loopback() {
        return Ok(());
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (use --allow-remote-mqtt to override)",
        original
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_schemes() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);

        let ep = parse_mqtt_endpoint("mqtts://broker.lan:8883", false).unwrap();
        assert_eq!(ep.host, "broker.lan");
        assert!(ep.use_tls);

        let ep = parse_mqtt_endpoint("mqtt://core-mosquitto:1883", true).unwrap();
        assert!(ep.use_tls);
    }

    #[test]
    fn parse_ipv6_brackets() {
        let ep = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert!(ep.is_loopback());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(parse_mqtt_endpoint("ws://host:80", false).is_err());
        assert!(parse_mqtt_endpoint("host", false).is_err());
        assert!(parse_mqtt_endpoint("host:notaport", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
    }

    #[test]
    fn loopback_policy() {
        let local = parse_mqtt_endpoint("localhost:1883", false).unwrap();
        assert!(validate_loopback_addr(&local, "localhost:1883").is_ok());

        let remote = parse_mqtt_endpoint("192.168.1.10:1883", false).unwrap();
        let err = validate_loopback_addr(&remote, "192.168.1.10:1883").unwrap_err();
        assert!(err.to_string().contains("loopback"));
    }

    #[test]
    fn tls_materials_require_cert_and_key_together() {
        let err = TlsMaterials::load(None, Some(Path::new("/nonexistent/cert.pem")), None)
            .unwrap_err();
        assert!(err.to_string().contains("without key"));
    }

    #[test]
    fn plain_transport_refuses_tls_materials() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        let tls = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        assert!(ep.transport(&tls).is_err());
        assert!(ep.transport(&TlsMaterials::default()).is_ok());
    }
}
