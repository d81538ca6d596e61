use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque provider-side server identifier (e.g. a Transfer Family `s-...` id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-reported lifecycle state of the managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    Offline,
    Starting,
    Online,
    Stopping,
    StartFailed,
    StopFailed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Starting => "STARTING",
            Self::Online => "ONLINE",
            Self::Stopping => "STOPPING",
            Self::StartFailed => "START_FAILED",
            Self::StopFailed => "STOP_FAILED",
        }
    }

    /// Parse the provider's wire name. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OFFLINE" => Some(Self::Offline),
            "STARTING" => Some(Self::Starting),
            "ONLINE" => Some(Self::Online),
            "STOPPING" => Some(Self::Stopping),
            "START_FAILED" => Some(Self::StartFailed),
            "STOP_FAILED" => Some(Self::StopFailed),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::StartFailed | Self::StopFailed)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server status and metadata returned from the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDescriptor {
    pub id: ServerId,
    pub name: String,
    pub state: ServerState,
    /// Only meaningful while `ONLINE`.
    pub endpoint: Option<String>,
}

/// Desired state for one credentialed principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    /// Logical prefix inside the storage backend, e.g. `/alice`.
    pub home_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// A desired user that could not be provisioned. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFailure {
    pub username: String,
    pub cause: String,
}

/// Parameters for creating a server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub storage: StorageRef,
    pub server_role: String,
    pub user_role: String,
    pub schedule_tag: Option<String>,
}

/// Parameters for creating a user on a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    /// Fully qualified home directory, `/<bucket><home_dir>`.
    pub home_directory: String,
    pub role: String,
    pub public_key: Option<String>,
    pub server_name: String,
}

/// Result of a create-user call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCreation {
    Created,
    /// The control API reported a duplicate; the desired state already holds.
    AlreadyExists,
}

/// Durable object store backing the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub bucket: String,
}

impl StorageRef {
    /// Qualify a logical home prefix with the bucket: `/alice` -> `/bucket/alice`.
    pub fn home_directory(&self, home_dir: &str) -> String {
        let prefix = home_dir.trim_start_matches('/');
        if prefix.is_empty() {
            format!("/{}", self.bucket)
        } else {
            format!("/{}/{prefix}", self.bucket)
        }
    }
}

/// A CNAME record pointing a stable name at the current endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsAliasRecord {
    pub name: String,
    pub target: String,
    pub ttl: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_wire_names() {
        for state in [
            ServerState::Offline,
            ServerState::Starting,
            ServerState::Online,
            ServerState::Stopping,
            ServerState::StartFailed,
            ServerState::StopFailed,
        ] {
            assert_eq!(ServerState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ServerState::parse("NOPE"), None);
    }

    #[test]
    fn home_directory_joins_bucket_and_prefix() {
        let storage = StorageRef {
            bucket: "wk-data".into(),
        };
        assert_eq!(storage.home_directory("/alice"), "/wk-data/alice");
        assert_eq!(storage.home_directory("bob/in"), "/wk-data/bob/in");
        assert_eq!(storage.home_directory("/"), "/wk-data");
    }

    #[test]
    fn user_spec_public_key_is_optional() {
        let user: UserSpec =
            serde_json::from_str(r#"{"username":"alice","home_dir":"/alice"}"#).unwrap();
        assert_eq!(user.public_key, None);
    }
}
