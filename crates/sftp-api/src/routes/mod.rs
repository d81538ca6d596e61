pub mod triggers;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/activate", post(triggers::activate))
        .route("/deactivate", post(triggers::deactivate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(authed)
        .route("/health", get(triggers::health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use sftp_core::memory::{InMemoryControlApi, InMemoryDns};
    use sftp_core::types::ServerState;
    use sftp_core::{ActivationConfig, DeactivationConfig};
    use sftp_infra::{BackendName, Backends};
    use tower::ServiceExt;

    use super::*;
    use crate::config::AppConfig;

    fn lookup() -> impl Fn(&str) -> Option<String> {
        let env: HashMap<String, String> = [
            ("SERVER_NAME", "wk-sftp"),
            ("SFTP_ROLE_ARN", "arn:aws:iam::123:role/sftp"),
            ("USER_ROLE_ARN", "arn:aws:iam::123:role/user"),
            ("S3_BUCKET", "wk-data"),
            (
                "SFTP_USER_CONFIGS",
                r#"[{"username":"alice","home_dir":"/alice","public_key":"ssh-ed25519 AAAA"}]"#,
            ),
            ("DOMAIN_NAME", "example.com"),
            ("HOSTED_ZONE_ID", "Z0EXAMPLE"),
            ("POLL_DELAY_SECS", "0"),
            ("ENDPOINT_DELAY_SECS", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        move |key: &str| env.get(key).cloned()
    }

    fn state(control: Arc<InMemoryControlApi>, api_key: Option<&str>) -> AppState {
        AppState::new(
            Backends {
                name: BackendName::Memory,
                control,
                dns: Arc::new(InMemoryDns::new()),
            },
            ActivationConfig::from_lookup(lookup()).unwrap(),
            DeactivationConfig::from_lookup(lookup()).unwrap(),
            AppConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                api_key: api_key.map(str::to_string),
            },
        )
    }

    async fn call(router: Router, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let resp = router
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn activate_then_deactivate() {
        let control = Arc::new(InMemoryControlApi::new());
        let router = api_router(state(control.clone(), None));

        let (status, body) = call(router.clone(), "POST", "/activate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["server_created"], true);
        assert_eq!(body["connection_hostname"], "server.example.com");
        assert_eq!(body["connection_examples"][0], "sftp alice@server.example.com");
        assert_eq!(body["dns"]["action"], "created");
        assert_eq!(
            control.server("wk-sftp").map(|s| s.state),
            Some(ServerState::Online)
        );

        let (status, body) = call(router.clone(), "POST", "/deactivate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previous_state"], "ONLINE");
        assert_eq!(body["users_removed"][0], "alice");
        assert!(control.server("wk-sftp").is_none());

        let (status, body) = call(router, "POST", "/deactivate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["server_id"].is_null());
    }

    #[tokio::test]
    async fn start_timeout_is_a_gateway_timeout() {
        let control = Arc::new(InMemoryControlApi::new());
        control.never_settle();
        let router = api_router(state(control, None));

        let (status, body) = call(router, "POST", "/activate", None).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(body["error"].as_str().unwrap().contains("did not reach ONLINE"));
    }

    #[tokio::test]
    async fn failed_alias_update_is_a_bad_gateway_with_the_report() {
        let control = Arc::new(InMemoryControlApi::new());
        control.hide_endpoint();
        let router = api_router(state(control.clone(), None));

        let (status, body) = call(router, "POST", "/activate", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["users_created"][0], "alice");
        assert_eq!(body["dns"]["action"], "failed");
        assert_eq!(body["dns"]["record"], "server.example.com");
        assert!(body["connection_hostname"].is_null());
        assert_eq!(
            control.server("wk-sftp").map(|s| s.state),
            Some(ServerState::Online)
        );
    }

    #[tokio::test]
    async fn triggers_require_the_api_key_when_set() {
        let control = Arc::new(InMemoryControlApi::new());
        let router = api_router(state(control.clone(), Some("s3cret")));

        let (status, body) = call(router.clone(), "POST", "/activate", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = call(router.clone(), "POST", "/activate", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(control.server("wk-sftp").is_none());

        let (status, body) = call(router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn authorized_trigger_runs() {
        let control = Arc::new(InMemoryControlApi::new());
        control.seed_server("wk-sftp", ServerState::Offline);
        let router = api_router(state(control.clone(), Some("s3cret")));

        let (status, body) = call(router, "POST", "/activate", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["server_created"], false);
        assert_eq!(control.server_count("wk-sftp"), 1);
    }
}
