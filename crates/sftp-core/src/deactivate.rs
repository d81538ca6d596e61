//! Stop-and-remove procedure.
//!
//! The DNS alias and the storage bucket are left alone; the alias keeps
//! pointing at the last endpoint until the next activation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DeactivationConfig;
use crate::poll::{PollOutcome, PollPolicy, poll_until};
use crate::types::{ServerId, ServerState};
use crate::{ControlApi, Error, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeactivationReport {
    /// No server carried the configured name.
    NoneRequired {
        server_name: String,
        completed_at: DateTime<Utc>,
    },
    Deleted {
        server_id: ServerId,
        previous_state: ServerState,
        users_removed: Vec<String>,
        completed_at: DateTime<Utc>,
    },
}

/// Stop and delete the named server. A missing server is a successful no-op.
///
/// Steps run strictly in order and the first failure ends the run.
pub async fn deactivate(
    control: &dyn ControlApi,
    config: &DeactivationConfig,
) -> Result<DeactivationReport> {
    info!(server_name = %config.server_name, "deactivation started");

    let Some(server) = control.find_server(&config.server_name).await? else {
        info!(server_name = %config.server_name, "no server found, nothing to do");
        return Ok(DeactivationReport::NoneRequired {
            server_name: config.server_name.clone(),
            completed_at: Utc::now(),
        });
    };

    info!(server_id = %server.id, state = %server.state, "found server");

    let users_removed = if config.remove_users {
        remove_users(control, &server.id).await?
    } else {
        Vec::new()
    };

    let still_exists = match server.state {
        ServerState::Online | ServerState::Starting => {
            control.stop_server(&server.id).await?;
            info!(server_id = %server.id, "stop requested");
            await_stopped(control, &server.id, config.stop_poll).await?
        }
        ServerState::Stopping => await_stopped(control, &server.id, config.stop_poll).await?,
        ServerState::Offline | ServerState::StartFailed | ServerState::StopFailed => true,
    };

    if still_exists {
        control.delete_server(&server.id).await?;
        info!(server_id = %server.id, "server deleted");
    }

    Ok(DeactivationReport::Deleted {
        server_id: server.id,
        previous_state: server.state,
        users_removed,
        completed_at: Utc::now(),
    })
}

async fn remove_users(control: &dyn ControlApi, id: &ServerId) -> Result<Vec<String>> {
    let users = control.list_users(id).await?;
    for username in &users {
        control.delete_user(id, username).await?;
        info!(server_id = %id, username = %username, "user deleted");
    }
    Ok(users)
}

/// Wait for `OFFLINE`. Returns `false` if the server disappeared meanwhile.
async fn await_stopped(control: &dyn ControlApi, id: &ServerId, policy: PollPolicy) -> Result<bool> {
    let outcome = poll_until(
        policy,
        move || async move {
            match control.describe_server(id).await {
                Ok(server) => Ok(Some(server.state)),
                Err(Error::ServerNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        },
        |state| {
            matches!(
                state,
                None | Some(ServerState::Offline) | Some(ServerState::StopFailed)
            )
        },
    )
    .await?;

    match outcome {
        PollOutcome::Reached(None) => {
            info!(server_id = %id, "server no longer exists");
            Ok(false)
        }
        PollOutcome::Reached(Some(ServerState::StopFailed)) => {
            warn!(server_id = %id, "server failed to stop, deleting anyway");
            Ok(true)
        }
        PollOutcome::Reached(Some(_)) => {
            info!(server_id = %id, "server is offline");
            Ok(true)
        }
        PollOutcome::Exhausted { attempts, last } => Err(Error::ServerStopTimeout {
            id: id.clone(),
            attempts,
            // `None` always satisfies the predicate, so `last` is set here.
            last: last.unwrap_or(ServerState::Stopping),
        }),
    }
}
