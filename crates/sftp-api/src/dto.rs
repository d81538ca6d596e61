use chrono::{DateTime, Utc};
use serde::Serialize;
use sftp_core::types::{ServerId, ServerState, UserFailure};
use sftp_core::{ActivationReport, DeactivationReport, DnsOutcome};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub message: String,
    pub server_id: ServerId,
    pub server_created: bool,
    pub endpoint: Option<String>,
    pub connection_hostname: Option<String>,
    /// `sftp user@host` lines for every user that exists after the run.
    pub connection_examples: Vec<String>,
    pub users_created: Vec<String>,
    pub users_present: Vec<String>,
    pub user_failures: Vec<UserFailure>,
    pub dns: DnsOutcome,
    pub completed_at: DateTime<Utc>,
}

impl From<ActivationReport> for ActivationResponse {
    fn from(report: ActivationReport) -> Self {
        let connection_hostname = report.connection_hostname().map(str::to_string);
        let connection_examples = match &connection_hostname {
            Some(host) => report
                .available_users()
                .map(|user| format!("sftp {user}@{host}"))
                .collect(),
            None => Vec::new(),
        };

        let mut message = "SFTP server is online".to_string();
        if !report.user_failures.is_empty() {
            message.push_str(&format!(
                ", {} user(s) could not be created",
                report.user_failures.len()
            ));
        }
        if let DnsOutcome::Failed { record, .. } = &report.dns {
            message.push_str(&format!(", alias {record} was not updated"));
        }

        Self {
            message,
            server_id: report.server_id,
            server_created: report.server_created,
            endpoint: report.endpoint,
            connection_hostname,
            connection_examples,
            users_created: report.users_created,
            users_present: report.users_present,
            user_failures: report.user_failures,
            dns: report.dns,
            completed_at: report.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeactivationResponse {
    pub message: String,
    pub server_id: Option<ServerId>,
    pub previous_state: Option<ServerState>,
    pub users_removed: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl From<DeactivationReport> for DeactivationResponse {
    fn from(report: DeactivationReport) -> Self {
        match report {
            DeactivationReport::NoneRequired {
                server_name,
                completed_at,
            } => Self {
                message: format!("no server named {server_name}, nothing to stop"),
                server_id: None,
                previous_state: None,
                users_removed: Vec::new(),
                completed_at,
            },
            DeactivationReport::Deleted {
                server_id,
                previous_state,
                users_removed,
                completed_at,
            } => Self {
                message: format!("SFTP server {server_id} stopped and deleted"),
                server_id: Some(server_id),
                previous_state: Some(previous_state),
                users_removed,
                completed_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_examples_use_the_alias() {
        let report = ActivationReport {
            server_id: ServerId("s-1".into()),
            server_created: true,
            endpoint: Some("s-1.server.transfer.us-east-1.amazonaws.com".into()),
            users_created: vec!["alice".into()],
            users_present: vec!["bob".into()],
            user_failures: vec![UserFailure {
                username: "carol".into(),
                cause: "quota".into(),
            }],
            dns: DnsOutcome::Created {
                record: "server.example.com".into(),
                target: "s-1.server.transfer.us-east-1.amazonaws.com".into(),
            },
            completed_at: Utc::now(),
        };

        let response = ActivationResponse::from(report);
        assert_eq!(
            response.connection_examples,
            ["sftp alice@server.example.com", "sftp bob@server.example.com"]
        );
        assert!(response.message.contains("1 user(s)"));
    }

    #[test]
    fn failed_alias_falls_back_to_endpoint() {
        let report = ActivationReport {
            server_id: ServerId("s-1".into()),
            server_created: false,
            endpoint: Some("s-1.server.transfer.us-east-1.amazonaws.com".into()),
            users_created: Vec::new(),
            users_present: vec!["alice".into()],
            user_failures: Vec::new(),
            dns: DnsOutcome::Failed {
                record: "server.example.com".into(),
                cause: "throttled".into(),
            },
            completed_at: Utc::now(),
        };

        let response = ActivationResponse::from(report);
        assert_eq!(
            response.connection_examples,
            ["sftp alice@s-1.server.transfer.us-east-1.amazonaws.com"]
        );
        assert_eq!(
            response.message,
            "SFTP server is online, alias server.example.com was not updated"
        );
    }

    #[test]
    fn no_op_deactivation_has_no_server() {
        let response = DeactivationResponse::from(DeactivationReport::NoneRequired {
            server_name: "wk-sftp".into(),
            completed_at: Utc::now(),
        });
        assert!(response.server_id.is_none());
        assert!(response.message.contains("wk-sftp"));
    }
}
