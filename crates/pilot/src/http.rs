use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use datapilot_contracts::{ErrorBody, error_body, now_iso};
use datapilot_store::{Store, StoreError, UserRecord};
use tracing::Instrument;

use crate::config::{PilotConfig, StartupError};

mod auth;
mod data;
mod users;

pub(crate) type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Clone)]
pub struct AppState {
    pub config: PilotConfig,
    store: Store,
}

pub async fn router(config: PilotConfig) -> Result<Router, StartupError> {
    let store = Store::connect_and_migrate(
        &config.db_url,
        Duration::from_millis(config.db_write_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_DB_UNAVAILABLE",
        message: format!("failed to initialize store: {}", err),
    })?;

    let state = AppState { config, store };

    Ok(Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/refresh", post(auth::refresh))
        .route("/users/me", get(users::read_me).put(users::update_me))
        .route("/data", post(data::create).get(data::list))
        .route(
            "/data/{data_id}",
            get(data::fetch).put(data::update).delete(data::remove),
        )
        .layer(middleware::from_fn(request_metrics_middleware))
        .with_state(state))
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "online",
        "message": "Data Pilot API is running",
        "version": "1.0.0",
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_ok = state.store.ping().await.is_ok();

    Json(serde_json::json!({
        "status": if database_ok { "healthy" } else { "degraded" },
        "timestamp": now_iso(),
        "services": {
            "database": if database_ok { "connected" } else { "unavailable" },
            "api": "running",
        },
    }))
}

async fn metrics() -> Response {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn request_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_string();
    let started = Instant::now();

    let span = tracing::info_span!("http.request", method = %method, route = %route);
    let response = next.run(request).instrument(span).await;

    crate::metrics::observe_http_request(
        &route,
        &method,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// Resolves the authenticated user from the bearer token: decode, then look
/// the subject up in the users table. Every failure mode is a 401.
pub(crate) async fn current_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<UserRecord, ApiError> {
    let token = datapilot_auth::bearer_token(headers).map_err(|_| {
        crate::metrics::inc_auth_failure();
        json_error(
            StatusCode::UNAUTHORIZED,
            "Could not validate credentials",
            None,
        )
    })?;

    let claims =
        datapilot_auth::decode_token(&state.config.secret_key, &token).map_err(|err| {
            crate::metrics::inc_auth_failure();
            json_error(StatusCode::UNAUTHORIZED, err.message, None)
        })?;

    let user = state
        .store
        .get_user_by_email(&claims.sub)
        .await
        .map_err(store_error)?;

    user.ok_or_else(|| {
        crate::metrics::inc_auth_failure();
        json_error(
            StatusCode::UNAUTHORIZED,
            "Could not validate credentials",
            None,
        )
    })
}

/// Maps persistence failures onto the uniform envelope. A unique-constraint
/// violation gets the friendlier duplicate-record message; everything else is
/// a generic 500 that never leaks internals.
pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::UniqueViolation => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "A record with this information already exists",
            None,
        ),
        other => {
            tracing::error!(error = %other, "database error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database operation failed",
                None,
            )
        }
    }
}

pub(crate) fn json_error(
    status: StatusCode,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> ApiError {
    (status, Json(error_body(status.as_u16(), message, details)))
}
