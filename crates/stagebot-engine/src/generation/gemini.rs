use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    GenerationRequest, GenerationResponse, ImageGenerator, InlineImage, RequestPart, ResponsePart,
};
use crate::config::{ApiKey, GenerationConfig};
use crate::http::response_json_or_error;
use crate::normalize::mime_for_path;

/// Google Generative Language `generateContent` image generation.
pub struct GeminiGenerator {
    api_base: String,
    api_key: Option<ApiKey>,
    model: String,
    request_timeout: Duration,
    http: HttpClient,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_parts(request: &GenerationRequest) -> Result<Vec<Value>> {
        request
            .parts
            .iter()
            .map(|part| match part {
                RequestPart::Text(text) => Ok(json!({ "text": text })),
                RequestPart::Image(path) => image_part_from_path(path),
            })
            .collect()
    }

    fn build_payload(request: &GenerationRequest) -> Result<Value> {
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": Self::build_parts(request)?,
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["TEXT", "IMAGE"],
            },
        }))
    }

    fn parse_response(payload: &Value) -> Result<GenerationResponse> {
        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut parts = Vec::new();

        for candidate in candidates {
            let rows = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in rows {
                let text = part.get("text").and_then(Value::as_str).map(str::to_string);
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object);
                let inline_image = match inline {
                    Some(inline) => {
                        let data = inline
                            .get("data")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if data.is_empty() {
                            None
                        } else {
                            let bytes = BASE64
                                .decode(data.as_bytes())
                                .context("Gemini image base64 decode failed")?;
                            let mime_type = inline
                                .get("mimeType")
                                .or_else(|| inline.get("mime_type"))
                                .and_then(Value::as_str)
                                .map(str::to_string);
                            Some(InlineImage { bytes, mime_type })
                        }
                    }
                    None => None,
                };
                parts.push(ResponsePart { text, inline_image });
            }
        }

        if parts.is_empty() {
            if let Some(reason) = payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
            {
                parts.push(ResponsePart {
                    text: Some(format!("prompt blocked: {reason}")),
                    inline_image: None,
                });
            }
        }

        Ok(GenerationResponse { parts })
    }
}

impl ImageGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let Some(api_key) = self.api_key.as_ref() else {
            bail!("Gemini API key not set (NANOBANANA_API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY)");
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request)?;
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.expose())])
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::parse_response(&response_payload)
    }
}

fn image_part_from_path(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(path).unwrap_or("image/jpeg");
    Ok(json!({
        "inlineData": {
            "mimeType": mime,
            "data": BASE64.encode(bytes),
        }
    }))
}
