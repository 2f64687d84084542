use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use datapilot_contracts::{ErrorBody, LogLevel, error_body, now_iso};
use tracing::Instrument;

use crate::broadcast::LogBroadcaster;
use crate::config::{AuthMode, DashConfig};
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;

mod pipeline;
mod ws;

pub(crate) type ApiError = (StatusCode, Json<ErrorBody>);

/// Principal used in `dev` auth mode, where any non-empty bearer token is
/// accepted.
const DEV_USER_ID: &str = "test_user";

/// Fixed response headers attached to every HTTP response.
const SECURITY_HEADERS: [(&str, &str); 7] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; img-src 'self' data: blob:; connect-src 'self' ws: wss:; object-src 'none'",
    ),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-permitted-cross-domain-policies", "none"),
];

#[derive(Clone)]
pub struct AppState {
    pub config: DashConfig,
    sessions: SessionStore,
    broadcaster: LogBroadcaster,
    rate_limiter: RateLimiter,
}

/// Client address resolved by the rate-limit middleware and stashed in
/// request extensions for handlers that log security events.
#[derive(Debug, Clone)]
pub(crate) struct ClientAddr(pub String);

pub fn router(config: DashConfig) -> Router {
    let state = AppState {
        rate_limiter: RateLimiter::new(config.rate_limit_max_keys),
        sessions: SessionStore::new(),
        broadcaster: LogBroadcaster::new(),
        config,
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/state", get(pipeline::state))
        .route("/api/security/log", post(pipeline::security_log))
        .route("/api/upload", post(pipeline::upload))
        .route("/api/preview", get(pipeline::preview))
        .route("/api/clean", post(pipeline::clean))
        .route("/api/analyze", post(pipeline::analyze))
        .route("/api/visualize", post(pipeline::visualize))
        .route("/api/model", post(pipeline::model))
        .route("/api/report", post(pipeline::report))
        .route("/api/convert", post(pipeline::convert))
        .route("/api/schema-validate", post(pipeline::schema_validate))
        .route("/ws/logs/{session_id}", get(ws::logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_metrics_middleware))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "online",
        "message": "Data Pipeline Dashboard API is running",
        "version": "1.0.0",
        "endpoints": {
            "upload": "/api/upload",
            "preview": "/api/preview",
            "clean": "/api/clean",
            "analyze": "/api/analyze",
            "visualize": "/api/visualize",
            "model": "/api/model",
            "report": "/api/report",
            "convert": "/api/convert",
            "schema": "/api/schema-validate",
            "state": "/api/state",
            "websocket": "/ws/logs/{session_id}",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": now_iso(),
        "active_sessions": state.sessions.len(),
        "active_websockets": state.broadcaster.active(),
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

/// Sliding-window limiting per client address, with the upload category held
/// to a tighter budget than the rest of the API. WebSocket handshakes are
/// exempt. Also resolves the client address for downstream handlers.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path.starts_with("/ws/") {
        return next.run(request).await;
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    request.extensions_mut().insert(ClientAddr(client.clone()));

    let (category, policy) = if path.contains("/upload") {
        ("upload", state.config.upload_limit)
    } else {
        ("api", state.config.api_limit)
    };

    let allowed = state.rate_limiter.allow(
        &format!("{}:{}", category, client),
        policy.max_requests,
        Duration::from_secs(policy.window_secs),
    );

    if !allowed {
        crate::metrics::inc_rate_limited();
        tracing::warn!(client_ip = %client, category, path = %path, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "Rate limit exceeded",
                "retry_after": policy.window_secs,
            })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
    response
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

/// Resolves the request's principal. In `dev` mode any non-empty bearer token
/// maps to the fixed development user; in `jwt` mode the token is verified
/// and the subject becomes the principal.
pub(crate) fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = datapilot_auth::bearer_token(headers)
        .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.message, None))?;

    match state.config.auth_mode {
        AuthMode::Dev => Ok(DEV_USER_ID.to_string()),
        AuthMode::Jwt => {
            let secret = state.config.auth_secret.as_deref().unwrap_or_default();
            let claims = datapilot_auth::decode_token(secret, &token)
                .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.message, None))?;
            Ok(claims.sub)
        }
    }
}

/// Broadcasts a log line to the session's live websocket (if any) and mirrors
/// it into the session record's log sequence.
pub(crate) fn emit_log(state: &AppState, session_id: &str, level: LogLevel, message: &str) {
    let entry = state.broadcaster.send(session_id, level, message);
    state.sessions.append_log(session_id, entry);
}

pub(crate) fn security_event(event_type: &str, details: serde_json::Value, client_ip: &str) {
    tracing::warn!(
        event_type,
        client_ip,
        details = %details,
        "security.event"
    );
}

pub(crate) fn json_error(
    status: StatusCode,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> ApiError {
    (status, Json(error_body(status.as_u16(), message, details)))
}
