//! Start-and-converge procedure.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ActivationConfig, DomainConfig};
use crate::poll::{PollOutcome, PollPolicy, poll_until};
use crate::types::{
    DnsAliasRecord, NewUser, ServerDescriptor, ServerId, ServerSpec, ServerState, UserCreation,
    UserSpec,
};
pub use crate::types::UserFailure;
use crate::{ControlApi, DnsApi, Error, Result};

/// Per-user reconciliation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Created,
    AlreadyPresent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DnsOutcome {
    /// No domain configured.
    Skipped,
    Unchanged {
        record: String,
        target: String,
    },
    Created {
        record: String,
        target: String,
    },
    Updated {
        record: String,
        previous: String,
        target: String,
    },
    /// No endpoint to point at, or the DNS API rejected the change. The
    /// server and user steps before it stand.
    Failed {
        record: String,
        cause: String,
    },
}

impl DnsOutcome {
    /// Alias that points at the server after this run.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::Skipped | Self::Failed { .. } => None,
            Self::Unchanged { record, .. }
            | Self::Created { record, .. }
            | Self::Updated { record, .. } => Some(record.as_str()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub server_id: ServerId,
    pub server_created: bool,
    /// Provider-assigned host, if it was discovered.
    pub endpoint: Option<String>,
    pub users_created: Vec<String>,
    pub users_present: Vec<String>,
    pub user_failures: Vec<UserFailure>,
    pub dns: DnsOutcome,
    pub completed_at: DateTime<Utc>,
}

impl ActivationReport {
    /// Name clients should connect to: the alias when one points at the
    /// server, the raw endpoint otherwise.
    pub fn connection_hostname(&self) -> Option<&str> {
        self.dns.alias().or(self.endpoint.as_deref())
    }

    /// Whether every hard step succeeded. Per-user failures do not count.
    pub fn is_complete(&self) -> bool {
        !self.dns.is_failed()
    }

    /// Users that exist on the server after this run.
    pub fn available_users(&self) -> impl Iterator<Item = &str> {
        self.users_created
            .iter()
            .chain(&self.users_present)
            .map(String::as_str)
    }
}

/// Bring the named server online, converge its users and point the alias at
/// its endpoint.
///
/// Safe to re-run: an existing server is reused, existing users are left
/// alone and an alias already pointing at the endpoint is not rewritten.
/// Per-user failures and a failed alias update are reported in the result
/// rather than returned as an error; see [`ActivationReport::is_complete`].
/// Nothing is rolled back when a later step fails.
pub async fn activate(
    control: &dyn ControlApi,
    dns: &dyn DnsApi,
    config: &ActivationConfig,
) -> Result<ActivationReport> {
    info!(
        server_name = %config.server_name,
        users = config.users.len(),
        dns = config.domain.is_some(),
        "activation started"
    );

    let Resolved {
        server,
        created: server_created,
        restarted_failed,
    } = resolve_server(control, config).await?;
    await_online(control, &server.id, config.start_poll, restarted_failed).await?;

    let outcomes = reconcile_users(control, &server.id, config).await;

    let mut users_created = Vec::new();
    let mut users_present = Vec::new();
    let mut user_failures = config.rejected_users.clone();
    for (user, outcome) in config.users.iter().zip(outcomes) {
        match outcome {
            UserOutcome::Created => users_created.push(user.username.clone()),
            UserOutcome::AlreadyPresent => users_present.push(user.username.clone()),
            UserOutcome::Failed(cause) => user_failures.push(UserFailure {
                username: user.username.clone(),
                cause,
            }),
        }
    }

    let endpoint = discover_endpoint(control, &server.id, config.endpoint_poll).await?;

    let dns_outcome = match &config.domain {
        None => {
            info!("no domain configured, skipping alias update");
            DnsOutcome::Skipped
        }
        Some(domain) => {
            let updated = match endpoint.as_deref() {
                Some(endpoint) => upsert_alias(dns, domain, endpoint).await,
                None => Err(Error::EndpointUnavailable(server.id.clone())),
            };
            updated.unwrap_or_else(|e| {
                warn!(record = %domain.record_name(), error = %e, "alias update failed");
                DnsOutcome::Failed {
                    record: domain.record_name(),
                    cause: e.to_string(),
                }
            })
        }
    };

    info!(
        server_id = %server.id,
        created = users_created.len(),
        present = users_present.len(),
        failed = user_failures.len(),
        dns_failed = dns_outcome.is_failed(),
        "activation complete"
    );

    Ok(ActivationReport {
        server_id: server.id,
        server_created,
        endpoint,
        users_created,
        users_present,
        user_failures,
        dns: dns_outcome,
        completed_at: Utc::now(),
    })
}

struct Resolved {
    server: ServerDescriptor,
    created: bool,
    /// Started again from `START_FAILED`/`STOP_FAILED`.
    restarted_failed: bool,
}

/// Find the server by name, creating or starting it as needed.
async fn resolve_server(control: &dyn ControlApi, config: &ActivationConfig) -> Result<Resolved> {
    let Some(server) = control.find_server(&config.server_name).await? else {
        info!(server_name = %config.server_name, "no server found, creating");
        let created = control
            .create_server(&ServerSpec {
                name: config.server_name.clone(),
                storage: config.storage.clone(),
                server_role: config.server_role.clone(),
                user_role: config.user_role.clone(),
                schedule_tag: config.schedule_tag.clone(),
            })
            .await?;
        info!(server_id = %created.id, state = %created.state, "server created");
        return Ok(Resolved {
            server: created,
            created: true,
            restarted_failed: false,
        });
    };

    info!(server_id = %server.id, state = %server.state, "found existing server");

    match server.state {
        ServerState::Starting | ServerState::Online => {}
        ServerState::Offline | ServerState::StartFailed | ServerState::StopFailed => {
            control.start_server(&server.id).await?;
            info!(server_id = %server.id, "start requested");
        }
        ServerState::Stopping => {
            info!(server_id = %server.id, "server is stopping, waiting for OFFLINE before start");
            await_offline(control, &server.id, config.start_poll).await?;
            control.start_server(&server.id).await?;
            info!(server_id = %server.id, "start requested");
        }
    }

    let restarted_failed = server.state.is_failed();
    Ok(Resolved {
        server,
        created: false,
        restarted_failed,
    })
}

/// Wait for `ONLINE`. With `stale_failure`, failed states are ignored until
/// the restart has been observed, since the provider may still report the
/// previous attempt.
async fn await_online(
    control: &dyn ControlApi,
    id: &ServerId,
    policy: PollPolicy,
    stale_failure: bool,
) -> Result<()> {
    let mut restart_seen = !stale_failure;
    let outcome = poll_until(
        policy,
        move || control.describe_server(id),
        |s| {
            if matches!(s.state, ServerState::Starting | ServerState::Online) {
                restart_seen = true;
            }
            s.state == ServerState::Online || (restart_seen && s.state.is_failed())
        },
    )
    .await?;

    match outcome {
        PollOutcome::Reached(s) if s.state == ServerState::Online => {
            info!(server_id = %id, "server is online");
            Ok(())
        }
        PollOutcome::Reached(s) => Err(Error::ServerFailed {
            id: id.clone(),
            state: s.state,
        }),
        PollOutcome::Exhausted { attempts, last } => Err(Error::ServerStartTimeout {
            id: id.clone(),
            attempts,
            last: last.state,
        }),
    }
}

async fn await_offline(control: &dyn ControlApi, id: &ServerId, policy: PollPolicy) -> Result<()> {
    let outcome = poll_until(
        policy,
        move || control.describe_server(id),
        |s| matches!(s.state, ServerState::Offline | ServerState::StopFailed),
    )
    .await?;

    match outcome {
        PollOutcome::Reached(_) => Ok(()),
        PollOutcome::Exhausted { attempts, last } => Err(Error::ServerStopTimeout {
            id: id.clone(),
            attempts,
            last: last.state,
        }),
    }
}

/// Create every desired user that is missing. Users run concurrently and a
/// failure only affects its own entry. Outcomes follow `config.users` order.
async fn reconcile_users(
    control: &dyn ControlApi,
    id: &ServerId,
    config: &ActivationConfig,
) -> Vec<UserOutcome> {
    join_all(
        config
            .users
            .iter()
            .map(|user| reconcile_user(control, id, config, user)),
    )
    .await
}

async fn reconcile_user(
    control: &dyn ControlApi,
    id: &ServerId,
    config: &ActivationConfig,
    user: &UserSpec,
) -> UserOutcome {
    match ensure_user(control, id, config, user).await {
        Ok(UserCreation::Created) => {
            info!(server_id = %id, username = %user.username, "user created");
            UserOutcome::Created
        }
        Ok(UserCreation::AlreadyExists) => {
            info!(server_id = %id, username = %user.username, "user already present");
            UserOutcome::AlreadyPresent
        }
        Err(e) => {
            warn!(server_id = %id, username = %user.username, error = %e, "user creation failed");
            UserOutcome::Failed(e.to_string())
        }
    }
}

// Existing users are never updated, even if their key or home changed.
async fn ensure_user(
    control: &dyn ControlApi,
    id: &ServerId,
    config: &ActivationConfig,
    user: &UserSpec,
) -> Result<UserCreation> {
    if control.find_user(id, &user.username).await? {
        return Ok(UserCreation::AlreadyExists);
    }

    control
        .create_user(
            id,
            &NewUser {
                username: user.username.clone(),
                home_directory: config.storage.home_directory(&user.home_dir),
                role: config.user_role.clone(),
                public_key: user.public_key.clone(),
                server_name: config.server_name.clone(),
            },
        )
        .await
}

/// Re-read the server until it reports an endpoint. `None` if it never does.
async fn discover_endpoint(
    control: &dyn ControlApi,
    id: &ServerId,
    policy: PollPolicy,
) -> Result<Option<String>> {
    let outcome = poll_until(
        policy,
        move || control.describe_server(id),
        |s| s.endpoint.is_some(),
    )
    .await?;

    match outcome {
        PollOutcome::Reached(s) => {
            info!(server_id = %id, endpoint = ?s.endpoint, "endpoint discovered");
            Ok(s.endpoint)
        }
        PollOutcome::Exhausted { attempts, .. } => {
            warn!(server_id = %id, attempts, "server reports no endpoint");
            Ok(None)
        }
    }
}

async fn upsert_alias(dns: &dyn DnsApi, domain: &DomainConfig, endpoint: &str) -> Result<DnsOutcome> {
    let desired = DnsAliasRecord {
        name: domain.record_name(),
        target: endpoint.to_string(),
        ttl: domain.ttl,
    };

    let existing = dns.find_record(&domain.hosted_zone_id, &desired.name).await?;

    if let Some(current) = &existing
        && same_host(&current.target, &desired.target)
        && current.ttl == desired.ttl
    {
        info!(record = %desired.name, target = %desired.target, "alias already current");
        return Ok(DnsOutcome::Unchanged {
            record: desired.name,
            target: desired.target,
        });
    }

    dns.upsert_record(&domain.hosted_zone_id, &desired)
        .await
        .map_err(|e| Error::DnsUpsertFailed {
            record: desired.name.clone(),
            cause: e.to_string(),
        })?;

    info!(record = %desired.name, target = %desired.target, "alias updated");

    Ok(match existing {
        Some(previous) => DnsOutcome::Updated {
            record: desired.name,
            previous: previous.target,
            target: desired.target,
        },
        None => DnsOutcome::Created {
            record: desired.name,
            target: desired.target,
        },
    })
}

fn same_host(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}
