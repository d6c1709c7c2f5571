use anyhow::Result;
use nutriscope_contracts::analysis::SAMPLE_ANALYSIS;
use serde_json::{json, Map, Value};

use super::{estimate_tokens, VisionProvider, VisionRequest, VisionResponse};

/// Offline provider: answers every request with the sample analysis.
pub struct DryrunProvider;

impl VisionProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(&self, request: &VisionRequest) -> Result<VisionResponse> {
        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), Value::String("dryrun".to_string()));
        provider_request.insert(
            "payload".to_string(),
            json!({
                "model": request.model,
                "instruction_chars": request.instruction.chars().count(),
                "mime_type": request.image.mime_type(),
                "image_sha256": request.image.sha256_hex(),
            }),
        );
        Ok(VisionResponse {
            text: SAMPLE_ANALYSIS.to_string(),
            input_tokens: Some(estimate_tokens(&request.instruction)),
            output_tokens: Some(estimate_tokens(SAMPLE_ANALYSIS)),
            finish_reason: Some("STOP".to_string()),
            provider_request,
        })
    }
}
