use std::sync::OnceLock;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use datapilot_store::UserRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, current_user, json_error, store_error};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RegisterRequest {
    username: String,
    email: String,
    #[serde(default)]
    full_name: Option<String>,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub(super) struct UserInfo {
    id: i64,
    username: String,
    email: String,
    full_name: Option<String>,
}

impl From<&UserRecord> for UserInfo {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    /// Epoch milliseconds, for frontend consumption.
    expires_at: i64,
    user: UserInfo,
}

pub(super) async fn register(
    State(state): State<AppState>,
    req: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserInfo>), ApiError> {
    let Json(req) = req.map_err(invalid_body)?;
    validate_registration(&req)?;

    let existing = state
        .store
        .get_user_by_email(&req.email)
        .await
        .map_err(store_error)?;
    if existing.is_some() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Email already registered",
            Some(serde_json::json!({"email": req.email})),
        ));
    }

    let hashed = datapilot_auth::hash_password(&req.password).map_err(|_| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to create user",
            None,
        )
    })?;

    let user = state
        .store
        .create_user(&req.username, &req.email, req.full_name.as_deref(), &hashed)
        .await
        .map_err(store_error)?;

    tracing::info!(user_id = user.id, "user registered");

    Ok((StatusCode::CREATED, Json(UserInfo::from(&user))))
}

pub(super) async fn login(
    State(state): State<AppState>,
    req: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = req.map_err(invalid_body)?;
    let user = state
        .store
        .get_user_by_email(&req.email)
        .await
        .map_err(store_error)?;

    let authenticated = user
        .filter(|user| datapilot_auth::verify_password(&req.password, &user.hashed_password));

    let Some(user) = authenticated else {
        crate::metrics::inc_auth_failure();
        tracing::warn!(email = %req.email, "login rejected");
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "Invalid email or password",
            Some(serde_json::json!({"email": req.email})),
        ));
    };

    issue_token_response(&state, &user)
}

pub(super) async fn logout() -> Json<serde_json::Value> {
    // Stateless JWTs: the client discards the token; nothing to revoke here.
    Json(serde_json::json!({"message": "Successfully logged out"}))
}

pub(super) async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, ApiError> {
    let user = current_user(&state, &headers).await?;
    Ok(Json(UserInfo::from(&user)))
}

pub(super) async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = current_user(&state, &headers).await?;
    issue_token_response(&state, &user)
}

fn issue_token_response(
    state: &AppState,
    user: &UserRecord,
) -> Result<Json<TokenResponse>, ApiError> {
    let issued = datapilot_auth::issue_token(
        &state.config.secret_key,
        &user.email,
        state.config.token_ttl_secs,
    )
    .map_err(|_| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to issue access token",
            None,
        )
    })?;

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "bearer",
        expires_at: issued.expires_at_ms,
        user: UserInfo::from(user),
    }))
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let mut errors = serde_json::Map::new();

    if !valid_email(&req.email) {
        errors.insert(
            "email".to_string(),
            serde_json::json!("value is not a valid email address"),
        );
    }
    if req.username.trim().is_empty() {
        errors.insert(
            "username".to_string(),
            serde_json::json!("must not be empty"),
        );
    }
    if req.password.is_empty() {
        errors.insert(
            "password".to_string(),
            serde_json::json!("must not be empty"),
        );
    }

    if errors.is_empty() {
        return Ok(());
    }

    Err(json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Validation failed",
        Some(serde_json::json!({"validation_errors": errors})),
    ))
}

pub(super) fn invalid_body(_: JsonRejection) -> ApiError {
    json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Validation failed",
        Some(serde_json::json!({
            "validation_errors": {"body": "invalid or missing JSON body"},
        })),
    )
}

fn valid_email(raw: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"))
        .is_match(raw)
}
