use anyhow::{Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

/// Non-success HTTP status from a remote service, kept typed inside the
/// `anyhow` chain so callers can `downcast_ref` and branch on the code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{service} request failed ({status}): {body}")]
pub struct HttpStatusError {
    pub service: String,
    pub status: u16,
    pub body: String,
}

pub fn http_status_of(err: &anyhow::Error) -> Option<u16> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HttpStatusError>())
        .map(|status_err| status_err.status)
}

pub fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        return Err(HttpStatusError {
            service: service.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub fn response_bytes_or_error(service: &str, response: HttpResponse) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(HttpStatusError {
            service: service.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("failed reading {service} response bytes"))?;
    Ok(bytes.to_vec())
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
