use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Runtime settings, read from the process environment.
#[derive(Clone)]
pub struct AnalyzerConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Option<Duration>,
    pub max_image_bytes: usize,
}

impl fmt::Debug for AnalyzerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("max_image_bytes", &self.max_image_bytes)
            .finish()
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: None,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Process environment first, then values from a dotenv file.
    pub fn from_env_with_dotenv(path: &Path) -> Self {
        let file_vars = load_dotenv(path);
        Self::from_lookup(|key| {
            env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let api_key = API_KEY_VARS.iter().find_map(|key| read(*key));
        let api_base = read("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base);
        let model = read("NUTRISCOPE_MODEL").unwrap_or(defaults.model);
        let request_timeout = read("NUTRISCOPE_REQUEST_TIMEOUT_SECS").and_then(|raw| {
            match raw.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
                _ => {
                    warn!(value = %raw, "ignoring invalid NUTRISCOPE_REQUEST_TIMEOUT_SECS");
                    None
                }
            }
        });
        let max_image_bytes = read("NUTRISCOPE_MAX_IMAGE_BYTES")
            .and_then(|raw| match raw.parse::<usize>() {
                Ok(limit) if limit > 0 => Some(limit),
                _ => {
                    warn!(value = %raw, "ignoring invalid NUTRISCOPE_MAX_IMAGE_BYTES");
                    None
                }
            })
            .unwrap_or(defaults.max_image_bytes);

        Self {
            api_key,
            api_base,
            model,
            request_timeout,
            max_image_bytes,
        }
    }
}

pub fn load_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    parse_dotenv(&content)
}

pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}
