use std::env;
use std::net::SocketAddr;

use sftp_core::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Bearer token required on trigger routes. Unset disables auth.
    pub api_key: Option<String>,
}

impl AppConfig {
    /// Create from env vars: `LISTEN_ADDR` (default: `0.0.0.0:8080`),
    /// `TRIGGER_API_KEY` (optional).
    pub fn from_env() -> Result<Self, Error> {
        let listen_addr = env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".into())
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("LISTEN_ADDR: {e}")))?;

        let api_key = env::var("TRIGGER_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            listen_addr,
            api_key,
        })
    }
}
