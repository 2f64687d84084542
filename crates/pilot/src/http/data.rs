use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use datapilot_contracts::DataType;
use datapilot_store::DataRecord;
use serde::{Deserialize, Serialize};

use super::auth::invalid_body;
use super::{ApiError, AppState, current_user, json_error, store_error};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct DataInput {
    title: String,
    content: String,
    #[serde(default = "default_data_type")]
    data_type: String,
}

fn default_data_type() -> String {
    "text".to_string()
}

#[derive(Debug, Serialize)]
pub(super) struct DataResponse {
    id: i64,
    title: String,
    content: String,
    data_type: String,
    created_at: String,
    user_id: i64,
}

impl From<DataRecord> for DataResponse {
    fn from(record: DataRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            content: record.content,
            data_type: record.data_type,
            created_at: record.created_at,
            user_id: record.user_id,
        }
    }
}

pub(super) async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    input: Result<Json<DataInput>, JsonRejection>,
) -> Result<Json<DataResponse>, ApiError> {
    let user = current_user(&state, &headers).await?;
    let Json(input) = input.map_err(invalid_body)?;
    validate_data_type(&input.data_type)?;

    let record = state
        .store
        .create_data(user.id, &input.title, &input.content, &input.data_type)
        .await
        .map_err(store_error)?;

    tracing::info!(user_id = user.id, data_id = record.id, "data item created");

    Ok(Json(DataResponse::from(record)))
}

pub(super) async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DataResponse>>, ApiError> {
    let user = current_user(&state, &headers).await?;

    let rows = state.store.list_data(user.id).await.map_err(store_error)?;

    Ok(Json(rows.into_iter().map(DataResponse::from).collect()))
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(data_id): Path<String>,
) -> Result<Json<DataResponse>, ApiError> {
    let user = current_user(&state, &headers).await?;
    let data_id = parse_data_id(&data_id)?;

    let record = state
        .store
        .get_data(data_id, user.id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(data_id, user.id))?;

    Ok(Json(DataResponse::from(record)))
}

pub(super) async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(data_id): Path<String>,
    input: Result<Json<DataInput>, JsonRejection>,
) -> Result<Json<DataResponse>, ApiError> {
    let user = current_user(&state, &headers).await?;
    let data_id = parse_data_id(&data_id)?;
    let Json(input) = input.map_err(invalid_body)?;
    validate_data_type(&input.data_type)?;

    let record = state
        .store
        .update_data(
            data_id,
            user.id,
            &input.title,
            &input.content,
            &input.data_type,
        )
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(data_id, user.id))?;

    tracing::info!(user_id = user.id, data_id, "data item updated");

    Ok(Json(DataResponse::from(record)))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(data_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = current_user(&state, &headers).await?;
    let data_id = parse_data_id(&data_id)?;

    let deleted = state
        .store
        .delete_data(data_id, user.id)
        .await
        .map_err(store_error)?;

    if !deleted {
        return Err(not_found(data_id, user.id));
    }

    tracing::info!(user_id = user.id, data_id, "data item deleted");

    Ok(Json(serde_json::json!({"message": "Data deleted successfully"})))
}

fn validate_data_type(raw: &str) -> Result<(), ApiError> {
    if DataType::parse(raw).is_some() {
        return Ok(());
    }

    let allowed = DataType::ALL
        .iter()
        .map(|dt| dt.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    Err(json_error(
        StatusCode::BAD_REQUEST,
        "Invalid data type",
        Some(serde_json::json!({
            "data_type": format!("Must be one of: {}", allowed),
        })),
    ))
}

fn parse_data_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>().map_err(|_| {
        json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Validation failed",
            Some(serde_json::json!({
                "validation_errors": {"data_id": "value is not a valid integer"},
            })),
        )
    })
}

fn not_found(data_id: i64, user_id: i64) -> ApiError {
    tracing::warn!(data_id, user_id, "data item not found");
    json_error(
        StatusCode::NOT_FOUND,
        "Data not found",
        Some(serde_json::json!({"data_id": data_id})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_validation_lists_the_allowed_set() {
        assert!(validate_data_type("note").is_ok());
        assert!(validate_data_type("task").is_ok());

        let (status, Json(body)) = validate_data_type("sql").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body.details.unwrap()["data_type"],
            "Must be one of: text, note, idea, task"
        );
    }

    #[test]
    fn data_id_must_be_an_integer() {
        assert_eq!(parse_data_id("42").unwrap(), 42);

        let (status, _) = parse_data_id("forty-two").unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
