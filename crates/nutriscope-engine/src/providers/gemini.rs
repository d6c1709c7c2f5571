use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{response_json_or_error, VisionProvider, VisionRequest, VisionResponse};
use crate::config::AnalyzerConfig;

/// Google Gemini `generateContent` transport.
pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self::new(&config.api_base, config.api_key.clone(), http))
    }

    pub fn new(api_base: &str, api_key: Option<String>, http: HttpClient) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    // Instruction first, then the photo, as one user turn.
    fn build_payload(request: &VisionRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.instruction },
                    {
                        "inlineData": {
                            "mimeType": request.image.mime_type(),
                            "data": request.image.base64(),
                        }
                    }
                ],
            }],
        })
    }

    /// Concatenated text parts of the first candidate, untouched.
    fn extract_text(response_payload: &Value) -> Result<String> {
        let Some(candidate) = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            if let Some(reason) = response_payload
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
            {
                bail!("Gemini blocked the request ({reason})");
            }
            bail!("Gemini returned no candidates");
        };

        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let texts: Vec<&str> = parts
            .iter()
            .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        if texts.is_empty() {
            let finish = candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            bail!("Gemini returned no text (finish reason: {finish})");
        }
        Ok(texts.concat())
    }

    fn extract_usage(response_payload: &Value) -> (Option<i64>, Option<i64>) {
        let usage = response_payload.get("usageMetadata");
        let read = |key: &str| usage.and_then(|row| row.get(key)).and_then(Value::as_i64);
        (read("promptTokenCount"), read("candidatesTokenCount"))
    }
}

impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, request: &VisionRequest) -> Result<VisionResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        debug!(
            endpoint = %endpoint,
            mime_type = request.image.mime_type(),
            image_bytes = request.image.byte_len(),
            "sending Gemini generateContent request"
        );

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            // The URL carries the API key.
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let text = Self::extract_text(&response_payload)?;
        let (input_tokens, output_tokens) = Self::extract_usage(&response_payload);
        let finish_reason = response_payload
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), Value::String(endpoint));
        provider_request.insert("payload".to_string(), payload);
        Ok(VisionResponse {
            text,
            input_tokens,
            output_tokens,
            finish_reason,
            provider_request,
        })
    }
}

#[cfg(test)]
mod tests {
    use reqwest::blocking::Client as HttpClient;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::GeminiProvider;
    use crate::config::AnalyzerConfig;
    use crate::image_input::fixtures::JPEG_MAGIC;
    use crate::image_input::ImagePayload;
    use crate::providers::{VisionProvider, VisionRequest, VisionResponse};

    const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-pro:generateContent";

    fn request_for_test() -> anyhow::Result<VisionRequest> {
        Ok(VisionRequest {
            model: "gemini-2.5-pro".to_string(),
            instruction: "Describe the plate.\n\nNo additional notes provided.".to_string(),
            image: ImagePayload::from_bytes(JPEG_MAGIC.to_vec())?,
        })
    }

    fn provider_for(api_base: &str, api_key: Option<&str>) -> anyhow::Result<GeminiProvider> {
        let http = HttpClient::builder().no_proxy().build()?;
        Ok(GeminiProvider::new(api_base, api_key.map(str::to_string), http))
    }

    async fn mount_generate(api_key: &str, status: u16, body: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", api_key))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    // The blocking client must be built, used and dropped off the async runtime.
    async fn analyze_against(
        server: &MockServer,
        api_key: &'static str,
    ) -> anyhow::Result<anyhow::Result<VisionResponse>> {
        let api_base = format!("{}/v1beta", server.uri());
        tokio::task::spawn_blocking(move || -> anyhow::Result<anyhow::Result<VisionResponse>> {
            let provider = provider_for(&api_base, Some(api_key))?;
            Ok(provider.analyze(&request_for_test()?))
        })
        .await?
    }

    #[test]
    fn from_config_uses_configured_base() -> anyhow::Result<()> {
        let config = AnalyzerConfig {
            api_base: "https://example.test/v1beta/".to_string(),
            ..AnalyzerConfig::default()
        };
        let provider = GeminiProvider::from_config(&config)?;
        assert_eq!(provider.api_base, "https://example.test/v1beta");
        assert_eq!(provider.api_key, None);
        Ok(())
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() -> anyhow::Result<()> {
        let provider = provider_for("https://example.test/v1beta/", None)?;
        assert_eq!(
            provider.endpoint_for_model("gemini-2.5-pro"),
            "https://example.test/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model(" models/gemini-2.5-flash "),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        Ok(())
    }

    #[test]
    fn payload_puts_instruction_before_inline_image() -> anyhow::Result<()> {
        let request = request_for_test()?;
        let payload = GeminiProvider::build_payload(&request);
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(parts[0]["text"], json!(request.instruction));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[1]["inlineData"]["data"], json!(request.image.base64()));
        Ok(())
    }

    #[test]
    fn extract_text_concatenates_parts_verbatim() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "  - Items Detected:\n"},
                    {"text": "  1) Pizza slice\n\n"}
                ]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(
            GeminiProvider::extract_text(&payload)?,
            "  - Items Detected:\n  1) Pizza slice\n\n"
        );
        Ok(())
    }

    #[test]
    fn extract_text_reports_blocked_and_empty_responses() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = GeminiProvider::extract_text(&blocked).unwrap_err();
        assert_eq!(err.to_string(), "Gemini blocked the request (SAFETY)");

        let empty = json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]});
        let err = GeminiProvider::extract_text(&empty).unwrap_err();
        assert_eq!(err.to_string(), "Gemini returned no text (finish reason: MAX_TOKENS)");

        let err = GeminiProvider::extract_text(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Gemini returned no candidates");
    }

    #[test]
    fn missing_api_key_fails_at_call_time() -> anyhow::Result<()> {
        let provider = provider_for("http://127.0.0.1:9/v1beta", None)?;
        let err = provider.analyze(&request_for_test()?).unwrap_err();
        assert_eq!(err.to_string(), "GEMINI_API_KEY or GOOGLE_API_KEY not set");
        Ok(())
    }

    #[tokio::test]
    async fn analyze_posts_to_generate_content_and_returns_text() -> anyhow::Result<()> {
        let server = mount_generate(
            "test-key",
            200,
            json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "- Total Estimated Calories: ~500 kcal"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 812, "candidatesTokenCount": 64}
            }),
        )
        .await;

        let response = analyze_against(&server, "test-key").await??;
        assert_eq!(response.text, "- Total Estimated Calories: ~500 kcal");
        assert_eq!(response.input_tokens, Some(812));
        assert_eq!(response.output_tokens, Some(64));
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert!(response.provider_request["endpoint"]
            .as_str()
            .is_some_and(|endpoint| !endpoint.contains("test-key")));

        let received = server.received_requests().await.unwrap_or_default();
        assert_eq!(received.len(), 1);
        let sent: Value = received[0].body_json()?;
        assert_eq!(sent["contents"][0]["role"], json!("user"));
        assert_eq!(
            sent["contents"][0]["parts"][0]["text"],
            json!(request_for_test()?.instruction)
        );
        assert_eq!(sent["contents"][0]["parts"][1]["inlineData"]["mimeType"], json!("image/jpeg"));
        Ok(())
    }

    #[tokio::test]
    async fn analyze_surfaces_http_errors() -> anyhow::Result<()> {
        let server = mount_generate(
            "bad-key",
            400,
            json!({
                "error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}
            }),
        )
        .await;

        let outcome = analyze_against(&server, "bad-key").await?;
        let err = outcome.err().map(|err| err.to_string()).unwrap_or_default();
        assert_eq!(
            err,
            "Gemini request failed (400): INVALID_ARGUMENT: API key not valid."
        );
        Ok(())
    }
}
