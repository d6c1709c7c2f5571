use std::sync::Arc;
use std::time::{Duration, Instant};

use nutriscope_contracts::analysis::{AnalysisRequest, AnalysisResult, InstructionTemplate};
use nutriscope_contracts::events::{EventKind, EventPayload, EventWriter};
use nutriscope_contracts::models::{ModelRegistry, ModelSelector, VISION_CAPABILITY};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

mod config;
mod error;
mod image_input;
pub mod providers;
mod session;

pub use config::{
    load_dotenv, parse_dotenv, AnalyzerConfig, DEFAULT_API_BASE, DEFAULT_MAX_IMAGE_BYTES,
    DEFAULT_MODEL,
};
pub use error::AnalysisError;
pub use image_input::{ImagePayload, SUPPORTED_FORMATS};
pub use session::AnalysisSession;

use providers::{default_provider_registry, VisionProviderRegistry, VisionRequest, VisionResponse};

/// Everything known about one analysis attempt, for display and receipts.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub result: AnalysisResult,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub fallback_reason: Option<String>,
    pub instruction: String,
    pub image_sha256: String,
    pub latency: Duration,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub finish_reason: Option<String>,
    pub error_kind: Option<&'static str>,
    pub provider_request: Map<String, Value>,
}

impl AnalysisReport {
    fn pending(instruction: String, image_sha256: String) -> Self {
        Self {
            result: AnalysisResult::failure("analysis did not run"),
            model: None,
            provider: None,
            fallback_reason: None,
            instruction,
            image_sha256,
            latency: Duration::ZERO,
            input_tokens: None,
            output_tokens: None,
            finish_reason: None,
            error_kind: None,
            provider_request: Map::new(),
        }
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}

/// Builds the instruction, makes the single transport call and folds the
/// outcome into an [`AnalysisResult`]. Holds no per-request state.
pub struct Analyzer {
    config: AnalyzerConfig,
    providers: VisionProviderRegistry,
    selector: ModelSelector,
    template: InstructionTemplate,
    events: Option<EventWriter>,
}

impl Analyzer {
    pub fn from_config(config: AnalyzerConfig) -> anyhow::Result<Self> {
        let providers = default_provider_registry(&config)?;
        Ok(Self::new(config, providers))
    }

    pub fn new(config: AnalyzerConfig, providers: VisionProviderRegistry) -> Self {
        Self {
            config,
            providers,
            selector: ModelSelector::new(None),
            template: InstructionTemplate::nutrition_v1(),
            events: None,
        }
    }

    pub fn with_template(mut self, template: InstructionTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_model_registry(mut self, registry: ModelRegistry) -> Self {
        self.selector = ModelSelector::new(Some(registry));
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn template(&self) -> &InstructionTemplate {
        &self.template
    }

    pub fn model_registry(&self) -> &ModelRegistry {
        &self.selector.registry
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn build_instruction(&self, notes: Option<&str>) -> String {
        self.template.render(notes)
    }

    pub fn analyze(&self, image: &ImagePayload, notes: Option<&str>) -> AnalysisResult {
        self.analyze_detailed(image, notes, None).result
    }

    /// Sniffs the captured bytes and folds the goal into the notes first.
    pub fn analyze_request(&self, request: &AnalysisRequest) -> AnalysisResult {
        let notes = request.effective_notes();
        match ImagePayload::from_bytes(Arc::clone(&request.image_bytes)) {
            Ok(image) => self.analyze(&image, notes.as_deref()),
            Err(err) => {
                warn!(error = %err, "rejected image before upload");
                AnalysisResult::failure(err.to_string())
            }
        }
    }

    pub fn analyze_detailed(
        &self,
        image: &ImagePayload,
        notes: Option<&str>,
        model: Option<&str>,
    ) -> AnalysisReport {
        let started = Instant::now();
        let mut report = AnalysisReport::pending(self.build_instruction(notes), image.sha256_hex());
        self.emit(
            EventKind::AnalysisStarted,
            json!({
                "requested_model": model.unwrap_or(&self.config.model),
                "template_version": self.template.version(),
                "notes_present": notes.is_some_and(|value| !value.is_empty()),
                "mime_type": image.mime_type(),
                "image_bytes": image.byte_len(),
            }),
        );

        let outcome = self.dispatch(image, model, &mut report);
        report.latency = started.elapsed();
        report.result = match outcome {
            Ok(response) => {
                report.input_tokens = response.input_tokens;
                report.output_tokens = response.output_tokens;
                report.finish_reason = response.finish_reason;
                report.provider_request = response.provider_request;
                info!(
                    model = report.model.as_deref().unwrap_or_default(),
                    latency_ms = report.latency_ms(),
                    text_chars = response.text.chars().count(),
                    "analysis succeeded"
                );
                AnalysisResult::Success {
                    text: response.text,
                }
            }
            Err(err) => {
                report.error_kind = Some(err.kind());
                warn!(
                    model = report.model.as_deref().unwrap_or_default(),
                    latency_ms = report.latency_ms(),
                    kind = err.kind(),
                    error = %err,
                    "analysis failed"
                );
                AnalysisResult::failure(err.to_string())
            }
        };
        self.emit_outcome(&report);
        report
    }

    fn dispatch(
        &self,
        image: &ImagePayload,
        model: Option<&str>,
        report: &mut AnalysisReport,
    ) -> Result<VisionResponse, AnalysisError> {
        let requested = model.unwrap_or(&self.config.model);
        let selection = self
            .selector
            .select(Some(requested), VISION_CAPABILITY)
            .map_err(AnalysisError::Configuration)?;
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!(reason, fallback = %selection.model.name, "model fallback");
        }
        report.model = Some(selection.model.name.clone());
        report.provider = Some(selection.model.provider.clone());
        report.fallback_reason = selection.fallback_reason.clone();

        image.ensure_within(self.config.max_image_bytes)?;
        let provider = self
            .providers
            .get(&selection.model.provider)
            .ok_or_else(|| {
                AnalysisError::Configuration(format!(
                    "no provider registered for '{}'",
                    selection.model.provider
                ))
            })?;

        let request = VisionRequest {
            model: selection.model.name,
            instruction: report.instruction.clone(),
            image: image.clone(),
        };
        provider.analyze(&request).map_err(AnalysisError::Transport)
    }

    fn emit_outcome(&self, report: &AnalysisReport) {
        let mut payload = json!({
            "model": report.model,
            "provider": report.provider,
            "latency_ms": report.latency_ms(),
        });
        let kind = match &report.result {
            AnalysisResult::Success { text } => {
                payload["text_chars"] = json!(text.chars().count());
                payload["input_tokens"] = json!(report.input_tokens);
                payload["output_tokens"] = json!(report.output_tokens);
                payload["finish_reason"] = json!(report.finish_reason);
                EventKind::AnalysisSucceeded
            }
            AnalysisResult::Failure { message } => {
                payload["error_kind"] = json!(report.error_kind);
                payload["message"] = json!(message);
                EventKind::AnalysisFailed
            }
        };
        self.emit(kind, payload);
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = events.emit(kind, payload) {
            warn!(error = %err, event = kind.as_str(), "failed to append event");
        }
    }
}
