use serde::{Deserialize, Serialize};

/// Current UTC time as an RFC3339 string, the timestamp format used across
/// both services' wire payloads.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Upload,
    Preview,
    Clean,
    Analyze,
    Visualize,
    Model,
    Report,
    Convert,
    Schema,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Upload => "upload",
            PipelineStage::Preview => "preview",
            PipelineStage::Clean => "clean",
            PipelineStage::Analyze => "analyze",
            PipelineStage::Visualize => "visualize",
            PipelineStage::Model => "model",
            PipelineStage::Report => "report",
            PipelineStage::Convert => "convert",
            PipelineStage::Schema => "schema",
        }
    }

    /// 1-based position in the fixed pipeline. Stage endpoints overwrite the
    /// session's step counter with this value; the counter is never derived
    /// from the step sequence.
    pub fn ordinal(self) -> u32 {
        match self {
            PipelineStage::Upload => 1,
            PipelineStage::Preview => 2,
            PipelineStage::Clean => 3,
            PipelineStage::Analyze => 4,
            PipelineStage::Visualize => 5,
            PipelineStage::Model => 6,
            PipelineStage::Report => 7,
            PipelineStage::Convert => 8,
            PipelineStage::Schema => 9,
        }
    }
}

/// The only status the pipeline ever records. Stages either complete or the
/// request fails before a step is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
}

/// One entry in a session's append-only step sequence. Stage-specific fields
/// (file_id, action, chart_type, ...) are free-form and flattened into the
/// wire object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub step: PipelineStage,
    pub status: StepStatus,
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl PipelineStep {
    pub fn completed(
        step: PipelineStage,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            step,
            status: StepStatus::Completed,
            timestamp: now_iso(),
            fields,
        }
    }
}

/// A pipeline session record. Process-lifetime only: created lazily on first
/// reference, never explicitly destroyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub current_file_id: Option<String>,
    pub current_step: u32,
    pub steps: Vec<PipelineStep>,
    pub logs: Vec<LogEntry>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_file_id: None,
            current_step: 0,
            steps: Vec::new(),
            logs: Vec::new(),
            created_at: now_iso(),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// The JSON object pushed over `/ws/logs/{session_id}` and mirrored into the
/// session's log sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
    pub session_id: String,
}

impl LogEntry {
    pub fn new(session_id: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: now_iso(),
            session_id: session_id.to_string(),
        }
    }
}

/// Categories a user data item may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Note,
    Idea,
    Task,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Text,
        DataType::Note,
        DataType::Idea,
        DataType::Task,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Note => "note",
            DataType::Idea => "idea",
            DataType::Task => "task",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|dt| dt.as_str() == raw)
    }
}

/// Uniform error envelope rendered for every failed request in both services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: bool,
    pub status_code: u16,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub fn error_body(
    status_code: u16,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> ErrorBody {
    ErrorBody {
        error: true,
        status_code,
        message: message.into(),
        timestamp: now_iso(),
        details,
    }
}
