use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::{AnalysisResult, Goal};
use crate::events::now_utc_iso;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;
pub const RECEIPT_FILE_NAME: &str = "analysis_receipt.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub model: String,
    pub provider: String,
    pub goal: Goal,
    pub user_notes: Option<String>,
    pub effective_notes: Option<String>,
    pub template_version: String,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptImage {
    pub mime_type: Option<String>,
    pub byte_len: u64,
    pub sha256: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReceiptMetrics {
    pub latency_ms: u64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub finish_reason: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn build_receipt(
    session_id: &str,
    request: &ReceiptRequest,
    image: &ReceiptImage,
    result: &AnalysisResult,
    metrics: &ReceiptMetrics,
    provider_request: &Map<String, Value>,
    analysis_path: Option<&Path>,
    receipt_path: &Path,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "session_id".to_string(),
        Value::String(session_id.to_string()),
    );
    root.insert("created_at".to_string(), Value::String(now_utc_iso()));
    root.insert(
        "request".to_string(),
        serde_json::to_value(request).unwrap_or(Value::Null),
    );
    root.insert(
        "image".to_string(),
        serde_json::to_value(image).unwrap_or(Value::Null),
    );
    root.insert(
        "provider_request".to_string(),
        sanitize_payload(&Value::Object(provider_request.clone())),
    );

    let mut outcome = Map::new();
    outcome.insert(
        "status".to_string(),
        Value::String(result.status().to_string()),
    );
    match result {
        AnalysisResult::Success { text } => {
            outcome.insert(
                "text_chars".to_string(),
                Value::Number((text.chars().count() as u64).into()),
            );
        }
        AnalysisResult::Failure { message } => {
            outcome.insert("message".to_string(), Value::String(message.clone()));
        }
    }
    root.insert("outcome".to_string(), Value::Object(outcome));
    root.insert(
        "metrics".to_string(),
        serde_json::to_value(metrics).unwrap_or(Value::Null),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "analysis_path".to_string(),
        analysis_path
            .map(|path| Value::String(path.to_string_lossy().to_string()))
            .unwrap_or(Value::Null),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

// Inline image data and credentials never land in receipts.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "data" | "image" | "image_bytes" | "key" | "api_key"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
