use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{Map, Value};

use super::{EnhancementApi, SubmitReply, TaskStatus};
use crate::config::{ApiKey, EnhancementConfig, EnhancementParams};
use crate::http::{response_bytes_or_error, response_json_or_error, truncate_text};

const SERVICE: &str = "Magnific";
const API_KEY_HEADER: &str = "x-freepik-api-key";

/// Freepik/Magnific image upscaler.
pub struct MagnificClient {
    endpoint: String,
    api_key: ApiKey,
    request_timeout: Duration,
    http: HttpClient,
}

impl MagnificClient {
    pub fn new(config: &EnhancementConfig, api_key: ApiKey) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn task_url(&self, task_id: &str) -> String {
        format!("{}/{}", self.endpoint, task_id)
    }
}

impl EnhancementApi for MagnificClient {
    fn submit(&self, image_base64: &str, params: &EnhancementParams) -> Result<SubmitReply> {
        let payload = build_payload(image_base64, params)?;
        let response = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, self.api_key.expose())
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .with_context(|| format!("Magnific submit failed ({})", self.endpoint))?;
        let value = response_json_or_error(SERVICE, response)?;
        Ok(parse_submit(&value))
    }

    fn poll(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.task_url(task_id);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, self.api_key.expose())
            .timeout(self.request_timeout)
            .send()
            .with_context(|| format!("Magnific poll failed ({url})"))?;
        let value = response_json_or_error(SERVICE, response)?;
        Ok(parse_status(&value))
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .with_context(|| format!("Magnific result download failed ({url})"))?;
        response_bytes_or_error(SERVICE, response)
    }
}

fn build_payload(image_base64: &str, params: &EnhancementParams) -> Result<Value> {
    let mut object = match serde_json::to_value(params)? {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    object.insert("image".to_string(), Value::String(image_base64.to_string()));
    Ok(Value::Object(object))
}

fn generated_urls(data: &Value) -> Vec<String> {
    data.get("generated")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_str)
                .filter(|url| !url.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_submit(value: &Value) -> SubmitReply {
    let data = value.get("data").unwrap_or(&Value::Null);
    let generated = generated_urls(data);
    if !generated.is_empty() {
        return SubmitReply::Generated(generated);
    }
    match data.get("task_id").and_then(Value::as_str) {
        Some(task_id) if !task_id.trim().is_empty() => SubmitReply::Queued {
            task_id: task_id.to_string(),
        },
        _ => SubmitReply::Unrecognized(truncate_text(&value.to_string(), 300)),
    }
}

fn parse_status(value: &Value) -> TaskStatus {
    let data = value.get("data").unwrap_or(&Value::Null);
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_uppercase();
    match status.as_str() {
        "COMPLETED" => TaskStatus::Completed {
            generated: generated_urls(data),
        },
        "FAILED" => TaskStatus::Failed {
            message: data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        _ => TaskStatus::Pending,
    }
}
