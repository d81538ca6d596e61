#![allow(dead_code)]

use std::time::Duration;

use sftp_core::types::{StorageRef, UserSpec};
use sftp_core::{ActivationConfig, DeactivationConfig, DomainConfig, PollPolicy};

pub const SERVER_NAME: &str = "wk-sftp";
pub const ZONE: &str = "Z0EXAMPLE";
pub const ALIAS: &str = "sftp.example.com";

pub fn fast_poll(max_attempts: u32) -> PollPolicy {
    PollPolicy::new(max_attempts, Duration::ZERO)
}

pub fn user(name: &str) -> UserSpec {
    UserSpec {
        username: name.to_string(),
        home_dir: format!("/{name}"),
        public_key: Some(format!("ssh-ed25519 AAAA{name}")),
    }
}

pub fn domain() -> DomainConfig {
    DomainConfig {
        domain_name: "example.com".into(),
        subdomain: "sftp".into(),
        hosted_zone_id: ZONE.into(),
        ttl: 60,
    }
}

pub fn activation(users: Vec<UserSpec>, domain: Option<DomainConfig>) -> ActivationConfig {
    ActivationConfig {
        server_name: SERVER_NAME.into(),
        storage: StorageRef {
            bucket: "wk-data".into(),
        },
        server_role: "arn:aws:iam::123456789012:role/sftp-server".into(),
        user_role: "arn:aws:iam::123456789012:role/sftp-user".into(),
        users,
        rejected_users: Vec::new(),
        domain,
        schedule_tag: None,
        start_poll: fast_poll(5),
        endpoint_poll: fast_poll(2),
    }
}

pub fn deactivation(remove_users: bool) -> DeactivationConfig {
    DeactivationConfig {
        server_name: SERVER_NAME.into(),
        remove_users,
        stop_poll: fast_poll(5),
    }
}
