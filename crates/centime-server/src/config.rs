use std::net::SocketAddr;
use std::path::PathBuf;

use centime_shared::constants::{
    DEFAULT_DB_FILE, DEFAULT_DHT_PORT, DEFAULT_HTTP_ADDR, DEFAULT_SECRET,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite ledger file.
    pub db_path: PathBuf,
    /// UDP port for the DHT; the TLS bus listens on the same TCP port.
    pub dht_port: u16,
    /// Bind address of the local web UI.
    pub http_addr: SocketAddr,
    /// Rendezvous secret shared between all of the user's instances.
    pub secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            dht_port: DEFAULT_DHT_PORT,
            http_addr: DEFAULT_HTTP_ADDR
                .parse()
                .expect("default HTTP address is valid"),
            secret: DEFAULT_SECRET.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CENTIME_DB") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(port) = std::env::var("CENTIME_DHT_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.dht_port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid CENTIME_DHT_PORT, using default");
            }
        }

        if let Ok(addr) = std::env::var("CENTIME_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid CENTIME_HTTP_ADDR, using default");
            }
        }

        if let Ok(secret) = std::env::var("CENTIME_SECRET") {
            if !secret.is_empty() {
                config.secret = secret;
            }
        }

        config
    }
}
