use std::{env, net::SocketAddr, str::FromStr};

use thiserror::Error;

const BIND_ADDRESS: &str = "DISPATCH_BIND_ADDRESS";
const STORE: &str = "DISPATCH_STORE";
const NOTIFY_BUFFER: &str = "DISPATCH_NOTIFY_BUFFER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Which store backs the dispatch server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub store: StoreKind,
    pub notify_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreKind::Postgres,
            notify_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from the environment. Unset variables keep
    /// their defaults, malformed ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_address: parse(&lookup, BIND_ADDRESS)?.unwrap_or(defaults.bind_address),
            store: parse(&lookup, STORE)?.unwrap_or(defaults.store),
            notify_buffer: parse(&lookup, NOTIFY_BUFFER)?.unwrap_or(defaults.notify_buffer),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{ConfigError, ServerConfig, StoreKind};

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]).unwrap(), ServerConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = config(&[
            ("DISPATCH_BIND_ADDRESS", "127.0.0.1:3000"),
            ("DISPATCH_STORE", "Memory"),
            ("DISPATCH_NOTIFY_BUFFER", "8"),
        ])
        .unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.notify_buffer, 8);
    }

    #[test]
    fn rejects_malformed_values() {
        let result = config(&[("DISPATCH_STORE", "sqlite")]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                name: "DISPATCH_STORE",
                ..
            })
        ));
        assert!(config(&[("DISPATCH_NOTIFY_BUFFER", "-1")]).is_err());
    }
}
