pub mod route53;
pub mod transfer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use sftp_core::memory::{InMemoryControlApi, InMemoryDns};
use sftp_core::{ControlApi, DnsApi, Error, Result};

pub use route53::Route53DnsApi;
pub use transfer::TransferControlApi;

/// Known backend sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendName {
    /// AWS Transfer Family + Route 53.
    Aws,
    /// Process-local fakes, for dry runs.
    Memory,
}

impl BackendName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Memory => "memory",
        }
    }

    /// Read `SFTP_BACKEND` (default: `"aws"`).
    pub fn from_env() -> Result<Self> {
        match std::env::var("SFTP_BACKEND") {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().parse(),
            _ => Ok(Self::Aws),
        }
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aws" => Ok(Self::Aws),
            "memory" => Ok(Self::Memory),
            other => Err(Error::InvalidConfig(format!("unknown backend: {other}"))),
        }
    }
}

/// The control and DNS backends a deployment talks to.
#[derive(Clone)]
pub struct Backends {
    pub name: BackendName,
    pub control: Arc<dyn ControlApi>,
    pub dns: Arc<dyn DnsApi>,
}

/// Build the named backend set.
///
/// AWS clients use the default credential and region chain.
pub async fn build_backends(name: BackendName) -> Backends {
    match name {
        BackendName::Aws => {
            let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
            tracing::info!(
                region = ?sdk_config.region(),
                "registered AWS Transfer Family and Route 53 backends"
            );
            Backends {
                name,
                control: Arc::new(TransferControlApi::new(&sdk_config)),
                dns: Arc::new(Route53DnsApi::new(&sdk_config)),
            }
        }
        BackendName::Memory => {
            tracing::warn!("using in-memory backends, nothing leaves this process");
            Backends {
                name,
                control: Arc::new(InMemoryControlApi::new()),
                dns: Arc::new(InMemoryDns::new()),
            }
        }
    }
}
