use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use datapilot_contracts::{LogLevel, PipelineStage, PipelineStep, SessionState};
use serde::Deserialize;

use super::{ApiError, AppState, ClientAddr, authenticate, emit_log, json_error, security_event};
use crate::validate;

#[derive(Debug, Deserialize)]
pub(super) struct SessionQuery {
    #[serde(default = "default_session_id")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct PreviewQuery {
    file_id: String,
    #[serde(default = "default_session_id")]
    session_id: String,
}

fn default_session_id() -> String {
    "default".to_string()
}

/// Get-or-create read of the session record. Unauthenticated, like the rest
/// of the read path.
pub(super) async fn state(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<SessionState> {
    Json(app.sessions.get_or_create(&query.session_id))
}

/// Receives security events from the frontend and forwards them into the
/// structured log.
pub(super) async fn security_log(
    State(app): State<AppState>,
    Extension(ClientAddr(client_ip)): Extension<ClientAddr>,
    headers: HeaderMap,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&app, &headers)?;

    let Json(body) = body
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "Invalid request body", None))?;

    let event_type = body
        .get("event")
        .and_then(|v| v.as_str())
        .map(validate::sanitize_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let details = body
        .get("details")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    security_event(&event_type, details, &client_ip);

    Ok(Json(serde_json::json!({"status": "logged"})))
}

pub(super) async fn upload(
    State(app): State<AppState>,
    Extension(ClientAddr(client_ip)): Extension<ClientAddr>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = authenticate(&app, &headers)?;

    if !validate::valid_session_id(&query.session_id) {
        security_event(
            "INVALID_SESSION_ID",
            serde_json::json!({"session_id": query.session_id}),
            &client_ip,
        );
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Invalid session ID format",
            None,
        ));
    }

    let file_id = mint_file_id();

    security_event(
        "FILE_UPLOAD_ATTEMPT",
        serde_json::json!({
            "session_id": query.session_id,
            "file_id": file_id,
            "user_id": user_id,
        }),
        &client_ip,
    );

    let mut fields = serde_json::Map::new();
    fields.insert("file_id".to_string(), serde_json::json!(file_id));
    fields.insert(
        "details".to_string(),
        serde_json::json!("Mock file uploaded successfully"),
    );

    app.sessions.record_step(
        &query.session_id,
        PipelineStep::completed(PipelineStage::Upload, fields),
        PipelineStage::Upload.ordinal(),
        Some(file_id.clone()),
        Some(&user_id),
    );

    emit_log(
        &app,
        &query.session_id,
        LogLevel::Success,
        &format!("File uploaded: {}", file_id),
    );

    security_event(
        "FILE_UPLOAD_SUCCESS",
        serde_json::json!({"session_id": query.session_id, "file_id": file_id}),
        &client_ip,
    );

    Ok(Json(serde_json::json!({
        "file_id": file_id,
        "status": "success",
    })))
}

pub(super) async fn preview(
    State(app): State<AppState>,
    Extension(ClientAddr(client_ip)): Extension<ClientAddr>,
    headers: HeaderMap,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = authenticate(&app, &headers)?;

    if !validate::valid_file_id(&query.file_id) {
        security_event(
            "INVALID_FILE_ID",
            serde_json::json!({"file_id": query.file_id}),
            &client_ip,
        );
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Invalid file ID format",
            None,
        ));
    }

    if !validate::valid_session_id(&query.session_id) {
        security_event(
            "INVALID_SESSION_ID",
            serde_json::json!({"session_id": query.session_id}),
            &client_ip,
        );
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Invalid session ID format",
            None,
        ));
    }

    // The one place session ownership is enforced: a session claimed by an
    // upload belongs to that user.
    if let Some(owner) = app.sessions.owner(&query.session_id)
        && owner != user_id
    {
        security_event(
            "UNAUTHORIZED_SESSION_ACCESS",
            serde_json::json!({
                "session_id": query.session_id,
                "user_id": user_id,
                "session_owner": owner,
            }),
            &client_ip,
        );
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "Access denied to session",
            None,
        ));
    }

    emit_log(
        &app,
        &query.session_id,
        LogLevel::Info,
        &format!("Previewing file: {}", query.file_id),
    );

    let mut fields = serde_json::Map::new();
    fields.insert("file_id".to_string(), serde_json::json!(query.file_id));
    fields.insert(
        "details".to_string(),
        serde_json::json!("Data preview generated"),
    );

    app.sessions.record_step(
        &query.session_id,
        PipelineStep::completed(PipelineStage::Preview, fields),
        PipelineStage::Preview.ordinal(),
        None,
        None,
    );

    emit_log(&app, &query.session_id, LogLevel::Success, "Preview completed");

    Ok(Json(serde_json::json!({
        "columns": ["id", "name", "age", "salary"],
        "sample": [
            [1, "John Doe", 30, 50000],
            [2, "Jane Smith", 25, 45000],
            [3, "Bob Johnson", 35, 60000],
        ],
        "summary": {
            "rows": 1000,
            "columns": 4,
            "missing_values": 15,
        },
    })))
}

pub(super) async fn clean(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Clean,
        app.config.processing_delay_ms,
        serde_json::json!({
            "action": "fillna",
            "params": {"method": "mean", "columns": ["age", "salary"]},
            "details": "Missing values filled with mean",
        }),
        "Starting data cleaning...",
        "Data cleaning completed",
    )
    .await;

    Json(serde_json::json!({"status": "success", "affected_rows": 15}))
}

pub(super) async fn analyze(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Analyze,
        app.config.processing_delay_ms,
        serde_json::json!({
            "analysis_type": "correlation",
            "details": "Correlation analysis completed",
        }),
        "Running statistical analysis...",
        "Analysis completed",
    )
    .await;

    Json(serde_json::json!({"correlation_matrix": [[1.0, 0.8], [0.8, 1.0]]}))
}

pub(super) async fn visualize(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Visualize,
        app.config.processing_delay_ms,
        serde_json::json!({
            "chart_type": "bar",
            "details": "Bar chart generated",
        }),
        "Generating visualization...",
        "Visualization completed",
    )
    .await;

    Json(serde_json::json!({"chart_url": "/static/charts/chart_123.png"}))
}

pub(super) async fn model(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Model,
        app.config.model_delay_ms,
        serde_json::json!({
            "model_type": "RandomForest",
            "details": "Model trained successfully",
        }),
        "Training ML model...",
        "Model training completed",
    )
    .await;

    Json(serde_json::json!({"accuracy": 0.95, "model_id": "model_123"}))
}

pub(super) async fn report(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Report,
        app.config.processing_delay_ms,
        serde_json::json!({
            "format": "PDF",
            "details": "PDF report generated",
        }),
        "Generating report...",
        "Report generated",
    )
    .await;

    Json(serde_json::json!({"report_url": "/static/reports/report_123.pdf"}))
}

pub(super) async fn convert(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Convert,
        app.config.processing_delay_ms,
        serde_json::json!({
            "from_format": "CSV",
            "to_format": "Parquet",
            "details": "File converted to Parquet",
        }),
        "Converting file format...",
        "Format conversion completed",
    )
    .await;

    Json(serde_json::json!({"download_url": "/static/converted/file_123.parquet"}))
}

pub(super) async fn schema_validate(
    State(app): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    run_stage(
        &app,
        &query.session_id,
        PipelineStage::Schema,
        app.config.processing_delay_ms,
        serde_json::json!({
            "schema_type": "JSON",
            "details": "Schema validation passed",
        }),
        "Validating schema...",
        "Schema validation completed",
    )
    .await;

    Json(serde_json::json!({"valid": true, "errors": []}))
}

/// Common body of the mocked stages: announce, simulate processing, append
/// the step (overwriting the counter with the stage ordinal), announce
/// completion.
async fn run_stage(
    app: &AppState,
    session_id: &str,
    stage: PipelineStage,
    delay_ms: u64,
    fields: serde_json::Value,
    start_message: &str,
    done_message: &str,
) {
    emit_log(app, session_id, LogLevel::Info, start_message);

    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let fields = match fields {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    app.sessions.record_step(
        session_id,
        PipelineStep::completed(stage, fields),
        stage.ordinal(),
        None,
        None,
    );

    emit_log(app, session_id, LogLevel::Success, done_message);
}

fn mint_file_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("file_{}", &hex[..8])
}
