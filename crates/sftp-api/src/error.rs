use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sftp_core::Error as CoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Procedure(#[from] CoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Procedure(e) if e.is_config() => StatusCode::BAD_REQUEST,
            ApiError::Procedure(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Procedure(
                CoreError::Control(_)
                | CoreError::Dns(_)
                | CoreError::DnsUpsertFailed { .. }
                | CoreError::ServerFailed { .. }
                | CoreError::EndpointUnavailable(_),
            ) => StatusCode::BAD_GATEWAY,
            ApiError::Procedure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
