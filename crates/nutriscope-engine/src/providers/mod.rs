use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::{Map, Value};

use crate::config::AnalyzerConfig;
use crate::image_input::ImagePayload;

mod dryrun;
mod gemini;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

/// One instruction plus one image, sent as a single transport call.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub instruction: String,
    pub image: ImagePayload,
}

#[derive(Debug, Clone, Default)]
pub struct VisionResponse {
    pub text: String,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub finish_reason: Option<String>,
    pub provider_request: Map<String, Value>,
}

pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, request: &VisionRequest) -> Result<VisionResponse>;
}

#[derive(Default)]
pub struct VisionProviderRegistry {
    providers: BTreeMap<String, Box<dyn VisionProvider>>,
}

impl VisionProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: VisionProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn VisionProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &AnalyzerConfig) -> Result<VisionProviderRegistry> {
    let mut providers = VisionProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::from_config(config)?);
    Ok(providers)
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            api_error_message(&body).unwrap_or_else(|| truncate_text(&body, 512))
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

// Google-style error envelope: {"error": {"message": ..., "status": ...}}
fn api_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let error = parsed.get("error")?.as_object()?;
    let message = error.get("message").and_then(Value::as_str)?.trim();
    if message.is_empty() {
        return None;
    }
    Some(match error.get("status").and_then(Value::as_str) {
        Some(status) if !status.is_empty() => format!("{status}: {message}"),
        _ => message.to_string(),
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn estimate_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    (chars + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::{api_error_message, default_provider_registry, estimate_tokens, truncate_text};
    use crate::config::AnalyzerConfig;

    #[test]
    fn default_registry_has_gemini_and_dryrun() -> anyhow::Result<()> {
        let registry = default_provider_registry(&AnalyzerConfig::default())?;
        assert_eq!(registry.names(), vec!["dryrun", "gemini"]);
        assert!(registry.get("gemini").is_some());
        assert!(registry.get("openai").is_none());
        Ok(())
    }

    #[test]
    fn api_error_envelope_is_summarized() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            api_error_message(body).as_deref(),
            Some("INVALID_ARGUMENT: API key not valid. Please pass a valid API key.")
        );
        assert_eq!(api_error_message("<html>502</html>"), None);
        assert_eq!(api_error_message(r#"{"error": {"message": " "}}"#), None);
    }

    #[test]
    fn truncate_and_token_estimates() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
