//! Relay configuration, read from the environment at start-up

use std::net::{IpAddr, SocketAddr};

use crate::error::{RelayError, Result};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_SECRET: &str = "secret_key";
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    /// Only accept the websocket transport (no long-polling)
    pub websocket_only: bool,
    /// Queued deliveries per connection before new ones are dropped
    pub outbound_buffer: usize,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = match lookup("RELAY_HOST") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| RelayError::Config(format!("RELAY_HOST is not an address: {raw}")))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = match lookup("RELAY_PORT").or_else(|| lookup("PORT")) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| RelayError::Config(format!("port is not a number: {raw}")))?,
            None => DEFAULT_PORT,
        };

        let outbound_buffer = match lookup("RELAY_OUTBOUND_BUFFER") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(RelayError::Config(format!(
                        "RELAY_OUTBOUND_BUFFER must be a positive number: {raw}"
                    )))
                }
            },
            None => DEFAULT_OUTBOUND_BUFFER,
        };

        Ok(Self {
            host,
            port,
            jwt_secret: lookup("JWT_SECRET")
                .filter(|secret| !secret.is_empty())
                .unwrap_or_else(|| DEFAULT_SECRET.to_string()),
            websocket_only: flag(lookup("RELAY_WEBSOCKET_ONLY"), true),
            outbound_buffer,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RelayConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:5000");
        assert_eq!(config.jwt_secret, "secret_key");
        assert!(config.websocket_only);
        assert_eq!(config.outbound_buffer, 256);
    }

    #[test]
    fn test_port_fallback_and_flags() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("RELAY_WEBSOCKET_ONLY", "off"),
            ("JWT_SECRET", "s3cret"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert!(!config.websocket_only);
        assert_eq!(config.jwt_secret, "s3cret");

        let config = config_from(&[("PORT", "8080"), ("RELAY_PORT", "9000")]).unwrap();
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("RELAY_PORT", "abc")]).is_err());
        assert!(config_from(&[("RELAY_HOST", "nowhere")]).is_err());
        assert!(config_from(&[("RELAY_OUTBOUND_BUFFER", "0")]).is_err());
    }
}
