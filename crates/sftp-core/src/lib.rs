//! Lifecycle automation for a scheduled, managed SFTP endpoint.
//!
//! Two stateless procedures are exposed: [`activate`] brings the server up,
//! converges its users and points a DNS alias at the live endpoint;
//! [`deactivate`] stops and removes the server. Both talk to the outside
//! world only through the [`ControlApi`] and [`DnsApi`] traits.

pub mod activate;
pub mod config;
pub mod deactivate;
pub mod memory;
pub mod poll;
pub mod types;

pub use activate::{ActivationReport, DnsOutcome, UserOutcome, activate};
pub use config::{ActivationConfig, DeactivationConfig, DomainConfig};
pub use deactivate::{DeactivationReport, deactivate};
pub use poll::{PollOutcome, PollPolicy, poll_until};

use async_trait::async_trait;
use types::{
    DnsAliasRecord, NewUser, ServerDescriptor, ServerId, ServerSpec, ServerState, UserCreation,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("server {id} did not reach ONLINE after {attempts} attempts (last state {last})")]
    ServerStartTimeout {
        id: ServerId,
        attempts: u32,
        last: ServerState,
    },

    #[error("server {id} did not reach OFFLINE after {attempts} attempts (last state {last})")]
    ServerStopTimeout {
        id: ServerId,
        attempts: u32,
        last: ServerState,
    },

    #[error("server {id} entered failed state {state}")]
    ServerFailed { id: ServerId, state: ServerState },

    #[error("server not found: {0}")]
    ServerNotFound(ServerId),

    #[error("server {0} is online but reports no endpoint")]
    EndpointUnavailable(ServerId),

    #[error("dns upsert of {record} failed: {cause}")]
    DnsUpsertFailed { record: String, cause: String },

    #[error("control api error: {0}")]
    Control(String),

    #[error("dns api error: {0}")]
    Dns(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the error came from a bounded wait running out of attempts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ServerStartTimeout { .. } | Self::ServerStopTimeout { .. }
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::MissingEnv(_) | Self::InvalidConfig(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Administrative interface of the managed file-transfer service.
///
/// Implementations own their own client configuration. Every call is made
/// once; retries happen only through [`poll_until`].
#[async_trait]
pub trait ControlApi: Send + Sync + 'static {
    /// Look up the server carrying the given name tag.
    async fn find_server(&self, name: &str) -> Result<Option<ServerDescriptor>>;

    /// Create a server. The provider starts it on its own.
    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerDescriptor>;

    async fn start_server(&self, id: &ServerId) -> Result<()>;

    async fn stop_server(&self, id: &ServerId) -> Result<()>;

    /// Delete a server. Deleting an absent server is not an error.
    async fn delete_server(&self, id: &ServerId) -> Result<()>;

    /// Current state and endpoint. Returns [`Error::ServerNotFound`] if gone.
    async fn describe_server(&self, id: &ServerId) -> Result<ServerDescriptor>;

    async fn find_user(&self, id: &ServerId, username: &str) -> Result<bool>;

    /// Create a user. A duplicate is reported as [`UserCreation::AlreadyExists`].
    async fn create_user(&self, id: &ServerId, user: &NewUser) -> Result<UserCreation>;

    async fn list_users(&self, id: &ServerId) -> Result<Vec<String>>;

    async fn delete_user(&self, id: &ServerId, username: &str) -> Result<()>;
}

/// DNS record interface for the alias zone.
#[async_trait]
pub trait DnsApi: Send + Sync + 'static {
    async fn find_record(&self, zone_id: &str, name: &str) -> Result<Option<DnsAliasRecord>>;

    /// Create or replace the CNAME in a single change.
    async fn upsert_record(&self, zone_id: &str, record: &DnsAliasRecord) -> Result<()>;
}
