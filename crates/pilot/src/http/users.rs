use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::auth::{UserInfo, invalid_body};
use super::{ApiError, AppState, current_user, json_error, store_error};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct UserUpdate {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
}

pub(super) async fn read_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, ApiError> {
    let user = current_user(&state, &headers).await?;
    Ok(Json(UserInfo::from(&user)))
}

pub(super) async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    update: Result<Json<UserUpdate>, JsonRejection>,
) -> Result<Json<UserInfo>, ApiError> {
    let user = current_user(&state, &headers).await?;
    let Json(update) = update.map_err(invalid_body)?;

    if let Some(username) = update.username.as_deref()
        && username.trim().is_empty()
    {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Validation failed",
            Some(serde_json::json!({
                "validation_errors": {"username": "must not be empty"},
            })),
        ));
    }

    let updated = state
        .store
        .update_user(
            user.id,
            update.username.as_deref(),
            update.full_name.as_deref(),
        )
        .await
        .map_err(store_error)?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "Resource not found", None))?;

    tracing::info!(user_id = user.id, "user updated their profile");

    Ok(Json(UserInfo::from(&updated)))
}
