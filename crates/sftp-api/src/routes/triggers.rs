use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::dto::{ActivationResponse, DeactivationResponse, HealthResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// Runs activation. A failed alias update still returns the full report, with
/// `502 Bad Gateway`.
pub async fn activate(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ActivationResponse>), ApiError> {
    let _guard = state.run_lock.lock().await;

    let report = sftp_core::activate(
        state.backends.control.as_ref(),
        state.backends.dns.as_ref(),
        &state.activation,
    )
    .await?;

    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    Ok((status, Json(report.into())))
}

pub async fn deactivate(
    State(state): State<AppState>,
) -> Result<Json<DeactivationResponse>, ApiError> {
    let _guard = state.run_lock.lock().await;

    let report = sftp_core::deactivate(state.backends.control.as_ref(), &state.deactivation).await?;

    Ok(Json(report.into()))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.backends.name.to_string(),
    })
}
