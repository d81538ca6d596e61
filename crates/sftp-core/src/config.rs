//! Invocation configuration.
//!
//! Everything a procedure needs is read once into an explicit value and
//! passed in; the procedures never touch the environment themselves.

use std::str::FromStr;
use std::time::Duration;

use crate::poll::PollPolicy;
use crate::types::{StorageRef, UserFailure, UserSpec};
use crate::{Error, Result};

const DEFAULT_SUBDOMAIN: &str = "server";
const DEFAULT_DNS_TTL_SECS: i64 = 60;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_POLL_DELAY_SECS: u64 = 10;
const DEFAULT_ENDPOINT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_ENDPOINT_DELAY_SECS: u64 = 30;

/// Where the alias record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    pub domain_name: String,
    pub subdomain: String,
    pub hosted_zone_id: String,
    pub ttl: i64,
}

impl DomainConfig {
    /// Fully qualified alias name, e.g. `server.example.com`.
    pub fn record_name(&self) -> String {
        format!(
            "{}.{}",
            self.subdomain,
            self.domain_name.trim_end_matches('.')
        )
    }
}

#[derive(Debug, Clone)]
pub struct ActivationConfig {
    pub server_name: String,
    pub storage: StorageRef,
    pub server_role: String,
    pub user_role: String,
    pub users: Vec<UserSpec>,
    /// `SFTP_USER_CONFIGS` entries that could not be read. Reported by
    /// activation alongside the users whose creation failed.
    pub rejected_users: Vec<UserFailure>,
    pub domain: Option<DomainConfig>,
    pub schedule_tag: Option<String>,
    pub start_poll: PollPolicy,
    pub endpoint_poll: PollPolicy,
}

#[derive(Debug, Clone)]
pub struct DeactivationConfig {
    pub server_name: String,
    pub remove_users: bool,
    pub stop_poll: PollPolicy,
}

impl ActivationConfig {
    /// Create from env vars:
    ///
    /// - `SERVER_NAME`, `SFTP_ROLE_ARN`, `USER_ROLE_ARN`, `S3_BUCKET` (required)
    /// - `SFTP_USER_CONFIGS` (JSON list, default `[]`)
    /// - `DOMAIN_NAME`, `HOSTED_ZONE_ID` (both needed for the DNS step)
    /// - `SFTP_SUBDOMAIN` (default: `"server"`), `DNS_TTL_SECS` (default: 60)
    /// - `SCHEDULE_TAG` (optional)
    /// - `POLL_MAX_ATTEMPTS`, `POLL_DELAY_SECS`, `ENDPOINT_MAX_ATTEMPTS`,
    ///   `ENDPOINT_DELAY_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_name = required(&lookup, "SERVER_NAME")?;
        let server_role = required(&lookup, "SFTP_ROLE_ARN")?;
        let user_role = required(&lookup, "USER_ROLE_ARN")?;
        let bucket = required(&lookup, "S3_BUCKET")?;

        let (users, rejected_users) = match non_empty(&lookup, "SFTP_USER_CONFIGS") {
            Some(raw) => parse_users(&raw)?,
            None => (Vec::new(), Vec::new()),
        };

        let domain = match (
            non_empty(&lookup, "DOMAIN_NAME"),
            non_empty(&lookup, "HOSTED_ZONE_ID"),
        ) {
            (Some(domain_name), Some(hosted_zone_id)) => Some(DomainConfig {
                domain_name,
                subdomain: non_empty(&lookup, "SFTP_SUBDOMAIN")
                    .unwrap_or_else(|| DEFAULT_SUBDOMAIN.into()),
                hosted_zone_id,
                ttl: parsed(&lookup, "DNS_TTL_SECS", DEFAULT_DNS_TTL_SECS)?,
            }),
            (domain_name, zone) => {
                if domain_name.is_some() || zone.is_some() {
                    tracing::warn!(
                        domain_set = domain_name.is_some(),
                        zone_set = zone.is_some(),
                        "partial DNS configuration, alias update disabled"
                    );
                }
                None
            }
        };

        Ok(Self {
            server_name,
            storage: StorageRef { bucket },
            server_role,
            user_role,
            users,
            rejected_users,
            domain,
            schedule_tag: non_empty(&lookup, "SCHEDULE_TAG"),
            start_poll: PollPolicy::new(
                parsed(&lookup, "POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS)?,
                Duration::from_secs(parsed(&lookup, "POLL_DELAY_SECS", DEFAULT_POLL_DELAY_SECS)?),
            ),
            endpoint_poll: PollPolicy::new(
                parsed(&lookup, "ENDPOINT_MAX_ATTEMPTS", DEFAULT_ENDPOINT_MAX_ATTEMPTS)?,
                Duration::from_secs(parsed(
                    &lookup,
                    "ENDPOINT_DELAY_SECS",
                    DEFAULT_ENDPOINT_DELAY_SECS,
                )?),
            ),
        })
    }
}

impl DeactivationConfig {
    /// Create from env vars: `SERVER_NAME` (required), `REMOVE_USERS_ON_STOP`
    /// (default: true), `POLL_MAX_ATTEMPTS`, `POLL_DELAY_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let remove_users = match non_empty(&lookup, "REMOVE_USERS_ON_STOP") {
            Some(v) => parse_bool("REMOVE_USERS_ON_STOP", &v)?,
            None => true,
        };

        Ok(Self {
            server_name: required(&lookup, "SERVER_NAME")?,
            remove_users,
            stop_poll: PollPolicy::new(
                parsed(&lookup, "POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS)?,
                Duration::from_secs(parsed(&lookup, "POLL_DELAY_SECS", DEFAULT_POLL_DELAY_SECS)?),
            ),
        })
    }
}

/// Parse the `SFTP_USER_CONFIGS` JSON list.
///
/// Only a document that is not a JSON list fails outright. Each unusable
/// entry is returned as a [`UserFailure`] keyed by its username, or by
/// `#<index>` when it has none, and the remaining entries are kept.
pub fn parse_users(raw: &str) -> Result<(Vec<UserSpec>, Vec<UserFailure>)> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| Error::InvalidConfig(format!("SFTP_USER_CONFIGS: {e}")))?;

    let mut users = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let label = entry
            .get("username")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("#{index}"), str::to_string);

        match serde_json::from_value::<UserSpec>(entry) {
            Ok(user) if user.username.trim().is_empty() => rejected.push(UserFailure {
                username: label,
                cause: "empty username".into(),
            }),
            Ok(user) => users.push(user),
            Err(e) => {
                tracing::warn!(user = %label, error = %e, "skipping unusable user entry");
                rejected.push(UserFailure {
                    username: label,
                    cause: format!("invalid user entry: {e}"),
                });
            }
        }
    }

    Ok((users, rejected))
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    non_empty(lookup, key).ok_or_else(|| Error::MissingEnv(key.into()))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::InvalidConfig(format!("{key}: not a boolean: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> HashMap<String, String> {
        env(&[
            ("SERVER_NAME", "wk-sftp"),
            ("SFTP_ROLE_ARN", "arn:aws:iam::1:role/sftp"),
            ("USER_ROLE_ARN", "arn:aws:iam::1:role/user"),
            ("S3_BUCKET", "wk-data"),
        ])
    }

    #[test]
    fn activation_defaults() {
        let vars = base();
        let config = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.server_name, "wk-sftp");
        assert_eq!(config.storage.bucket, "wk-data");
        assert!(config.users.is_empty());
        assert!(config.rejected_users.is_empty());
        assert!(config.domain.is_none());
        assert_eq!(config.start_poll, PollPolicy::new(30, Duration::from_secs(10)));
        assert_eq!(config.endpoint_poll, PollPolicy::new(5, Duration::from_secs(30)));
    }

    #[test]
    fn missing_required_var_is_reported_by_name() {
        let mut vars = base();
        vars.remove("S3_BUCKET");
        let err = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::MissingEnv(ref k) if k == "S3_BUCKET"));
    }

    #[test]
    fn domain_needs_both_name_and_zone() {
        let mut vars = base();
        vars.insert("DOMAIN_NAME".into(), "example.com".into());
        let config = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(config.domain.is_none());

        vars.insert("HOSTED_ZONE_ID".into(), "Z123".into());
        let config = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        let domain = config.domain.unwrap();
        assert_eq!(domain.record_name(), "server.example.com");
        assert_eq!(domain.ttl, 60);
    }

    #[test]
    fn users_are_parsed_from_json() {
        let mut vars = base();
        vars.insert(
            "SFTP_USER_CONFIGS".into(),
            r#"[{"username":"alice","home_dir":"/alice","public_key":"ssh-ed25519 AAAA"},
                {"username":"bob","home_dir":"/bob"}]"#
                .into(),
        );
        let config = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[0].public_key.as_deref(), Some("ssh-ed25519 AAAA"));
        assert_eq!(config.users[1].public_key, None);
    }

    #[test]
    fn malformed_user_json_is_invalid_config() {
        let mut vars = base();
        vars.insert("SFTP_USER_CONFIGS".into(), "[{\"username\":".into());
        let err = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.is_config());

        vars.insert("SFTP_USER_CONFIGS".into(), r#"{"username":"alice"}"#.into());
        assert!(ActivationConfig::from_lookup(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn bad_user_entries_are_skipped_individually() {
        let mut vars = base();
        vars.insert(
            "SFTP_USER_CONFIGS".into(),
            r#"[{"username":"alice","home_dir":"/alice"},
                {"username":"bob"},
                {"home_dir":"/nobody"},
                {"username":" ","home_dir":"/blank"}]"#
                .into(),
        );
        let config = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].username, "alice");

        let rejected: Vec<&str> = config
            .rejected_users
            .iter()
            .map(|f| f.username.as_str())
            .collect();
        assert_eq!(rejected, ["bob", "#2", "#3"]);
        assert!(config.rejected_users[0].cause.contains("home_dir"));
        assert_eq!(config.rejected_users[2].cause, "empty username");
    }

    #[test]
    fn bad_number_is_invalid_config() {
        let mut vars = base();
        vars.insert("POLL_MAX_ATTEMPTS".into(), "lots".into());
        let err = ActivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref m) if m.contains("POLL_MAX_ATTEMPTS")));
    }

    #[test]
    fn deactivation_removes_users_by_default() {
        let vars = env(&[("SERVER_NAME", "wk-sftp")]);
        let config = DeactivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(config.remove_users);

        let vars = env(&[("SERVER_NAME", "wk-sftp"), ("REMOVE_USERS_ON_STOP", "false")]);
        let config = DeactivationConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(!config.remove_users);

        let vars = env(&[("SERVER_NAME", "wk-sftp"), ("REMOVE_USERS_ON_STOP", "maybe")]);
        assert!(DeactivationConfig::from_lookup(|k| vars.get(k).cloned()).is_err());
    }
}
