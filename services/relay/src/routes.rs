//! Router and the client-facing chat endpoints

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use account_pool::AccountPool;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::admin;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::metrics;
use crate::models::{DEFAULT_MODEL, MODELS};
use crate::openai::{ChatCompletionRequest, ErrorEnvelope, unix_now};
use crate::sse::{self, DrainOutcome};

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit layer bounds in-flight requests; excess requests
/// queue rather than fail. CORS is wide open so browser clients can call
/// the chat endpoint directly; preflight OPTIONS requests are answered by
/// the layer.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/models", get(list_models_handler))
        .route("/accounts/status", get(admin::accounts_status_handler))
        .route("/accounts/reload", post(admin::accounts_reload_handler))
        .route(
            "/accounts/update-balance",
            post(admin::update_balance_handler),
        )
        .route(
            "/accounts/reset-disabled",
            post(admin::reset_disabled_handler),
        )
        .route("/health", get(admin::health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string(body).unwrap_or_default(),
    )
        .into_response()
}

fn dispatch_error_response(error: &DispatchError) -> Response {
    match error {
        DispatchError::UnknownModel(..) => {
            let mut envelope = ErrorEnvelope::new(error.to_string(), "invalid_request_error");
            envelope.error.param = Some("model");
            envelope.error.code = Some("model_not_found");
            json_response(StatusCode::BAD_REQUEST, &envelope)
        }
        DispatchError::NoAccountsAvailable | DispatchError::AllAccountsFailed(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &ErrorEnvelope::new(error.to_string(), "service_unavailable"),
        ),
    }
}

async fn chat_completions_handler(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<ChatCompletionRequest>,
) -> Response {
    let started = Instant::now();
    let model_name = request.model.as_deref().unwrap_or(DEFAULT_MODEL).to_string();
    let mode = if request.stream { "stream" } else { "blocking" };
    info!(model = %model_name, mode, messages = request.messages.len(), "chat completion request");

    let dispatched = match state.dispatcher.dispatch(&request.messages, &model_name).await {
        Ok(dispatched) => dispatched,
        Err(e) => {
            metrics::record_completion(&model_name, mode, "dispatch_failed", started.elapsed().as_secs_f64());
            return dispatch_error_response(&e);
        }
    };

    if request.stream {
        let frames = sse::translate_stream(
            dispatched.stream,
            state.pool.clone(),
            dispatched.account.session.expose().clone(),
            dispatched.account.email,
            model_name.clone(),
        );
        metrics::record_completion(&model_name, mode, "ok", started.elapsed().as_secs_f64());
        let body = Body::from_stream(frames.map(|frame| Ok::<_, Infallible>(Bytes::from(frame))));
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    } else {
        let outcome = sse::drain_completion(
            dispatched.stream,
            state.pool.clone(),
            dispatched.account.session.expose().clone(),
            dispatched.account.email,
            model_name.clone(),
        )
        .await;
        match outcome {
            DrainOutcome::Completed(response) => {
                metrics::record_completion(&model_name, mode, "ok", started.elapsed().as_secs_f64());
                json_response(StatusCode::OK, &response)
            }
            DrainOutcome::Errored(envelope) => {
                metrics::record_completion(&model_name, mode, "error", started.elapsed().as_secs_f64());
                json_response(StatusCode::OK, &envelope)
            }
        }
    }
}

/// `GET /v1/models` — the static model table in list form.
async fn list_models_handler() -> Response {
    let created = unix_now();
    let data: Vec<serde_json::Value> = MODELS
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.name,
                "object": "model",
                "created": created,
                "owned_by": "freeplay",
                "max_tokens": m.max_tokens,
                "model_id": m.upstream_id,
            })
        })
        .collect();
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "object": "list", "data": data }),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
