use std::path::{Path, PathBuf};

use nutriscope_contracts::analysis::{effective_notes, AnalysisResult, Goal};
use nutriscope_contracts::runs::receipts::{
    build_receipt, ReceiptImage, ReceiptMetrics, ReceiptRequest,
};
use serde_json::Value;
use tracing::debug;

use crate::error::AnalysisError;
use crate::image_input::ImagePayload;
use crate::{AnalysisReport, Analyzer};

/// Interactive state: the chosen photo, notes, goal and the single current
/// analysis. A new submission replaces the previous one.
#[derive(Debug, Clone, Default)]
pub struct AnalysisSession {
    id: String,
    image: Option<ImagePayload>,
    image_path: Option<PathBuf>,
    notes: String,
    goal: Goal,
    model: Option<String>,
    current: Option<Submission>,
}

/// Inputs exactly as sent for the current analysis, next to its report.
#[derive(Debug, Clone)]
struct Submission {
    report: AnalysisReport,
    image: ImagePayload,
    image_path: Option<PathBuf>,
    notes: String,
    goal: Goal,
    effective_notes: Option<String>,
}

impl AnalysisSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn load_image(&mut self, path: &Path) -> Result<&ImagePayload, AnalysisError> {
        let payload = ImagePayload::from_path(path)?;
        debug!(path = %path.display(), bytes = payload.byte_len(), "image loaded");
        self.image_path = Some(path.to_path_buf());
        Ok(self.image.insert(payload))
    }

    pub fn set_image(&mut self, payload: ImagePayload) {
        self.image = Some(payload);
        self.image_path = None;
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        self.image.as_ref()
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn set_goal(&mut self, goal: Goal) {
        self.goal = goal;
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Notes as sent to the model, with the goal folded in.
    pub fn effective_notes(&self) -> Option<String> {
        effective_notes(Some(self.notes.as_str()), self.goal)
    }

    pub fn instruction_preview(&self, analyzer: &Analyzer) -> String {
        analyzer.build_instruction(self.effective_notes().as_deref())
    }

    /// Runs one analysis for the loaded image. Returns `None` when no image
    /// has been chosen yet.
    pub fn submit(&mut self, analyzer: &Analyzer) -> Option<&AnalysisReport> {
        let image = self.image.clone()?;
        let effective_notes = self.effective_notes();
        let report =
            analyzer.analyze_detailed(&image, effective_notes.as_deref(), self.model.as_deref());
        let submission = self.current.insert(Submission {
            report,
            image,
            image_path: self.image_path.clone(),
            notes: self.notes.clone(),
            goal: self.goal,
            effective_notes,
        });
        Some(&submission.report)
    }

    pub fn current(&self) -> Option<&AnalysisReport> {
        self.current.as_ref().map(|submission| &submission.report)
    }

    pub fn current_result(&self) -> Option<&AnalysisResult> {
        self.current().map(|report| &report.result)
    }

    /// Text offered for download; only a successful analysis has one.
    pub fn export_text(&self) -> Option<&str> {
        self.current_result().and_then(AnalysisResult::text)
    }

    pub fn clear(&mut self) {
        let id = std::mem::take(&mut self.id);
        *self = Self::new(id);
    }

    /// Receipt for the current analysis, built from the inputs it ran with
    /// rather than whatever the session holds now.
    pub fn receipt(
        &self,
        template_version: &str,
        analysis_path: Option<&Path>,
        receipt_path: &Path,
    ) -> Option<Value> {
        let submission = self.current.as_ref()?;
        let report = &submission.report;
        let request = ReceiptRequest {
            model: report.model.clone().unwrap_or_default(),
            provider: report.provider.clone().unwrap_or_default(),
            goal: submission.goal,
            user_notes: Some(submission.notes.clone()).filter(|notes| !notes.is_empty()),
            effective_notes: submission.effective_notes.clone(),
            template_version: template_version.to_string(),
            fallback_reason: report.fallback_reason.clone(),
        };
        let image = &submission.image;
        let (width, height) = image.dimensions().unzip();
        let receipt_image = ReceiptImage {
            mime_type: Some(image.mime_type().to_string()),
            byte_len: image.byte_len() as u64,
            sha256: report.image_sha256.clone(),
            width,
            height,
            source_path: submission
                .image_path
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
        };
        let metrics = ReceiptMetrics {
            latency_ms: report.latency_ms(),
            input_tokens: report.input_tokens,
            output_tokens: report.output_tokens,
            finish_reason: report.finish_reason.clone(),
        };
        Some(build_receipt(
            &self.id,
            &request,
            &receipt_image,
            &report.result,
            &metrics,
            &report.provider_request,
            analysis_path,
            receipt_path,
        ))
    }
}
