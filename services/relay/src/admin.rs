//! Operator endpoints for pool inspection and maintenance

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::info;

use crate::routes::AppState;

/// `GET /accounts/status` — pool counts and per-account summaries.
///
/// Summaries never include passwords or session tokens.
pub async fn accounts_status_handler(State(state): State<AppState>) -> Response {
    let status = state.pool.status().await;
    Json(status).into_response()
}

/// `POST /accounts/reload` — re-read the account store from disk.
pub async fn accounts_reload_handler(State(state): State<AppState>) -> Response {
    if let Err(e) = state.pool.reload().await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response();
    }
    let total = state.pool.len().await;
    info!(total, "account store reloaded");
    Json(serde_json::json!({
        "message": format!("reloaded {total} accounts"),
        "total_accounts": total,
    }))
    .into_response()
}

/// `POST /accounts/update-balance` — re-probe every account and persist.
pub async fn update_balance_handler(State(state): State<AppState>) -> Response {
    let (updated, failed) = state.pool.refresh_all().await;
    info!(updated, failed, "all balances refreshed");
    Json(serde_json::json!({
        "message": "balance update complete",
        "updated_accounts": updated,
        "failed_accounts": failed,
        "total_accounts": state.pool.len().await,
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetDisabledRequest {
    #[serde(default)]
    pub default_balance: Option<f64>,
}

/// `POST /accounts/reset-disabled` — give every disabled account a fresh
/// balance so selection considers it again. The body may override the
/// configured default.
pub async fn reset_disabled_handler(
    State(state): State<AppState>,
    body: Option<Json<ResetDisabledRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    if let Some(balance) = request.default_balance
        && balance < 0.0
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "default_balance must not be negative" })),
        )
            .into_response();
    }

    let reset = state.pool.reset_disabled(request.default_balance).await;
    info!(reset, "disabled accounts reset");
    Json(serde_json::json!({
        "message": "reset complete",
        "reset_accounts": reset,
    }))
    .into_response()
}

/// `GET /health` — 200 while at least one account is usable, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let status = state.pool.status().await;
    let uptime = state.started_at.elapsed().as_secs();

    let (code, label) = if status.available > 0 {
        (StatusCode::OK, "healthy")
    } else if status.total > 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no_accounts")
    };

    (
        code,
        Json(serde_json::json!({
            "status": label,
            "accounts_total": status.total,
            "accounts_available": status.available,
            "accounts_disabled": status.disabled,
            "uptime_seconds": uptime,
        })),
    )
        .into_response()
}
