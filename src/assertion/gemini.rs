//! Gemini vision model as a [`VisualOracle`].
//!
//! Talks to the Generative Language REST API directly:
//! `POST {base}/v1beta/models/{model}:generateContent?key={key}` with a text prompt and one
//! `inline_data` part per screenshot.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::oracle::{OracleVerdict, VisualOracle, MAX_IMAGES};
use crate::error::{E2eError, E2eResult};
use crate::utils::api_key::load_api_key;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Largest decoded image accepted per call
pub const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Minimum spacing between consecutive API requests
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);

const PROMPT_TEMPLATE: &str = r#"You are a UI test validator. Analyze this screenshot.

You are given {image_count} image(s) (up to 3).

Expected: {expected}

Does the screenshot match the expected result?
Answer ONLY in JSON format (no markdown, no extra text):
{
  "pass": true or false,
  "confidence": 0.0 to 1.0,
  "reason": "detailed explanation"
}
"#;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub top_p: f64,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            top_p: 0.0,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Config with the API key from `GEMINI_API_KEY` or `~/.flow/env`
    pub fn from_env() -> E2eResult<Self> {
        Ok(Self::new(&load_api_key()?))
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

pub struct GeminiOracle {
    config: GeminiConfig,
    client: reqwest::Client,
    last_request: Mutex<Option<Instant>>,
}

impl GeminiOracle {
    pub fn new(config: GeminiConfig) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| E2eError::Oracle(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            last_request: Mutex::new(None),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sleep until at least [`MIN_REQUEST_INTERVAL`] has passed since the previous request
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        )
    }
}

#[async_trait]
impl VisualOracle for GeminiOracle {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn judge(&self, images: &[String], expected: &str) -> E2eResult<OracleVerdict> {
        let decoded = decode_images(images)?;

        let mut parts = vec![serde_json::json!({ "text": build_prompt(expected, decoded.len()) })];
        for (bytes, mime_type) in &decoded {
            parts.push(serde_json::json!({
                "inline_data": {
                    "mime_type": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            }));
        }
        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
            }
        });

        self.rate_limit().await;
        log::debug!(
            "Gemini request: model={}, images={}",
            self.config.model,
            decoded.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| E2eError::Oracle(format!("Gemini request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(E2eError::Oracle(format!(
                "Gemini API returned HTTP {}: {}",
                status.as_u16(),
                truncate(&text, 200)
            )));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| E2eError::Oracle(format!("Malformed Gemini response: {}", e)))?;

        Ok(parse_verdict(&payload.text()))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

fn build_prompt(expected: &str, image_count: usize) -> String {
    PROMPT_TEMPLATE
        .replace("{image_count}", &image_count.to_string())
        .replace("{expected}", expected)
}

fn decode_images(images: &[String]) -> E2eResult<Vec<(Vec<u8>, &'static str)>> {
    if images.is_empty() {
        return Err(E2eError::Oracle(
            "At least one screenshot is required.".to_string(),
        ));
    }
    if images.len() > MAX_IMAGES {
        return Err(E2eError::Oracle(format!(
            "Maximum {} screenshots supported (got {}).",
            MAX_IMAGES,
            images.len()
        )));
    }

    images
        .iter()
        .map(|data| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| E2eError::Oracle(format!("Invalid base64 screenshot: {}", e)))?;
            if bytes.len() > MAX_IMAGE_BYTES {
                return Err(E2eError::Oracle(
                    "One or more screenshots exceed 4MB limit.".to_string(),
                ));
            }
            let mime_type = sniff_mime_type(&bytes);
            Ok((bytes, mime_type))
        })
        .collect()
}

/// MIME type from the image header, PNG when unrecognised
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => "image/png",
    }
}

/// Interpret model output as a verdict.
///
/// Accepts bare JSON, JSON wrapped in a Markdown fence, or JSON surrounded by prose. When no
/// JSON object can be recovered, text mentioning both "pass" and "true" counts as a
/// low-confidence pass.
pub fn parse_verdict(text: &str) -> OracleVerdict {
    let text = strip_code_fence(text.trim());

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(serde_json::Value::Object(fields)) =
                serde_json::from_str::<serde_json::Value>(&text[start..=end])
            {
                let success = fields.get("pass").map(truthy).unwrap_or(false);
                let confidence = fields.get("confidence").and_then(number).unwrap_or(0.0);
                let reason = match fields.get("reason") {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Null) | None => "No reason provided".to_string(),
                    Some(other) => other.to_string(),
                };
                return OracleVerdict::new(success, confidence, &reason);
            }
        }
    }

    let lower = text.to_lowercase();
    if lower.contains("pass") && lower.contains("true") {
        return OracleVerdict::new(
            true,
            0.5,
            &format!("Heuristic parse from: {}", truncate(text, 200)),
        );
    }

    OracleVerdict::degraded(&format!(
        "Cannot parse VLM response: {}",
        truncate(text, 200)
    ))
}

fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let body = text.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        serde_json::Value::Null => false,
    }
}

fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let verdict = parse_verdict(r#"{"pass": true, "confidence": 0.92, "reason": "login form shown"}"#);
        assert!(verdict.success);
        assert_eq!(verdict.confidence, 0.92);
        assert_eq!(verdict.reason, "login form shown");
        assert!(verdict.warning.is_none());
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"pass\": false, \"confidence\": 0.3, \"reason\": \"dialog missing\"}\n```";
        let verdict = parse_verdict(text);
        assert!(!verdict.success);
        assert_eq!(verdict.confidence, 0.3);
    }

    #[test]
    fn test_parse_json_inside_prose() {
        let text = "Sure. {\"pass\": 1, \"confidence\": \"0.7\"} Hope this helps.";
        let verdict = parse_verdict(text);
        assert!(verdict.success);
        assert_eq!(verdict.confidence, 0.7);
        assert_eq!(verdict.reason, "No reason provided");
    }

    #[test]
    fn test_heuristic_fallback() {
        let verdict = parse_verdict("The test should PASS: true, everything is visible");
        assert!(verdict.success);
        assert_eq!(verdict.confidence, 0.5);
        assert!(verdict.reason.starts_with("Heuristic parse from:"));

        let verdict = parse_verdict("I cannot tell.");
        assert!(!verdict.success);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reason.starts_with("Cannot parse VLM response"));
    }

    #[test]
    fn test_sniff_mime_type() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert_eq!(sniff_mime_type(&png), "image/png");
        assert_eq!(sniff_mime_type(&jpeg), "image/jpeg");
        assert_eq!(sniff_mime_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime_type(b"garbage"), "image/png");
    }

    #[test]
    fn test_image_count_and_size_limits() {
        assert!(decode_images(&[]).is_err());

        let one = base64::engine::general_purpose::STANDARD.encode(b"img");
        assert!(decode_images(&vec![one.clone(); 3]).is_ok());
        let err = decode_images(&vec![one; 4]).unwrap_err();
        assert!(err.to_string().contains("Maximum 3"));

        let big = base64::engine::general_purpose::STANDARD.encode(vec![0u8; MAX_IMAGE_BYTES + 1]);
        assert!(decode_images(&[big]).unwrap_err().to_string().contains("4MB"));
    }

    #[test]
    fn test_prompt_and_endpoint() {
        let prompt = build_prompt("login form visible", 2);
        assert!(prompt.contains("You are given 2 image(s)"));
        assert!(prompt.contains("Expected: login form visible"));
        assert!(prompt.contains("\"pass\": true or false"));

        let oracle = GeminiOracle::new(
            GeminiConfig::new("k123").with_base_url("http://127.0.0.1:9999/"),
        )
        .unwrap();
        assert_eq!(
            oracle.endpoint(),
            "http://127.0.0.1:9999/v1beta/models/gemini-2.0-flash:generateContent?key=k123"
        );
    }
}
