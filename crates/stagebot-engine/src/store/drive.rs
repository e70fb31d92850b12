use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::service_account::{ServiceAccountKey, TokenSource, DRIVE_SCOPE};
use super::{ObjectStore, SourceFile};
use crate::http::{response_bytes_or_error, response_json_or_error};
use crate::normalize::mime_for_path;

const SERVICE: &str = "Google Drive";
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const PAGE_SIZE: &str = "1000";

/// Google Drive v3, authenticated as a service account. Shared drives are
/// supported on every call.
pub struct DriveStore {
    tokens: TokenSource,
    http: HttpClient,
    api_base: String,
    upload_base: String,
}

impl DriveStore {
    pub fn from_service_account_file(path: &Path) -> Result<Self> {
        let key = ServiceAccountKey::from_file(path)?;
        Self::new(key)
    }

    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        Ok(Self {
            tokens: TokenSource::new(key, DRIVE_SCOPE, REQUEST_TIMEOUT)?,
            http: HttpClient::new(),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
        })
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base, file_id)
    }

    fn list_page(&self, folder: &str, page_token: Option<&str>) -> Result<Value> {
        let token = self.tokens.access_token()?;
        let query = parents_query(folder);
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", "nextPageToken, files(id, name, mimeType)"),
            ("pageSize", PAGE_SIZE),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }
        let url = format!("{}/files", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .with_context(|| format!("Drive list request failed ({folder})"))?;
        response_json_or_error(SERVICE, response)
    }
}

impl ObjectStore for DriveStore {
    fn kind(&self) -> &str {
        "drive"
    }

    fn list(&self, folder: &str) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(folder, page_token.as_deref())?;
            files.extend(parse_file_list(&page));
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        debug!(folder, count = files.len(), "drive listing");
        Ok(files)
    }

    fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let token = self.tokens.access_token()?;
        let response = self
            .http
            .get(self.file_url(file_id))
            .bearer_auth(token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .with_context(|| format!("Drive download failed ({file_id})"))?;
        response_bytes_or_error(SERVICE, response)
    }

    fn upload(&self, bytes: &[u8], folder: &str, name: &str) -> Result<String> {
        let token = self.tokens.access_token()?;
        let mime_type = mime_for_path(Path::new(name)).unwrap_or("image/jpeg");
        let boundary = format!("stagebot-{}", Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "parents": [folder] });
        let body = multipart_related_body(&boundary, &metadata, mime_type, bytes);
        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", "id"),
            ])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={boundary}"),
            )
            .timeout(REQUEST_TIMEOUT)
            .body(body)
            .send()
            .with_context(|| format!("Drive upload failed ({name})"))?;
        let payload = response_json_or_error(SERVICE, response)?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Drive upload response has no file id"))
    }

    fn move_file(&self, file_id: &str, from: &str, to: &str) -> Result<()> {
        let token = self.tokens.access_token()?;
        let response = self
            .http
            .patch(self.file_url(file_id))
            .bearer_auth(token)
            .query(&[
                ("addParents", to),
                ("removeParents", from),
                ("supportsAllDrives", "true"),
                ("fields", "id, parents"),
            ])
            .json(&json!({}))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .with_context(|| format!("Drive move failed ({file_id})"))?;
        response_json_or_error(SERVICE, response)?;
        Ok(())
    }

    fn folder_name(&self, folder: &str) -> Result<String> {
        let token = self.tokens.access_token()?;
        let response = self
            .http
            .get(self.file_url(folder))
            .bearer_auth(token)
            .query(&[("fields", "name"), ("supportsAllDrives", "true")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .with_context(|| format!("Drive folder lookup failed ({folder})"))?;
        let payload = response_json_or_error(SERVICE, response)?;
        payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Drive folder {folder} has no name"))
    }

    fn account(&self) -> Option<&str> {
        Some(self.tokens.email())
    }
}

fn parents_query(folder: &str) -> String {
    let escaped = folder.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents and trashed = false")
}

fn parse_file_list(page: &Value) -> Vec<SourceFile> {
    page.get("files")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let id = row.get("id").and_then(Value::as_str)?;
                    let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
                    let mime_type = row.get("mimeType").and_then(Value::as_str).unwrap_or_default();
                    Some(SourceFile {
                        id: id.to_string(),
                        name: name.to_string(),
                        mime_type: mime_type.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn multipart_related_body(boundary: &str, metadata: &Value, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{multipart_related_body, parents_query, parse_file_list};

    #[test]
    fn parents_query_escapes_quotes() {
        assert_eq!(
            parents_query("1AbC"),
            "'1AbC' in parents and trashed = false"
        );
        assert_eq!(
            parents_query("o'brien"),
            "'o\\'brien' in parents and trashed = false"
        );
    }

    #[test]
    fn file_list_skips_rows_without_id() {
        let page = json!({
            "files": [
                {"id": "f1", "name": "kim_bedroom_modern_2.jpg", "mimeType": "image/jpeg"},
                {"name": "orphan"},
                {"id": "f2", "name": "notes", "mimeType": "application/vnd.google-apps.document"}
            ],
            "nextPageToken": "p2"
        });
        let files = parse_file_list(&page);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "kim_bedroom_modern_2.jpg");
        assert!(files[0].is_image());
        assert!(!files[1].is_image());
        assert!(parse_file_list(&json!({})).is_empty());
    }

    #[test]
    fn multipart_body_frames_metadata_then_media() {
        let body = multipart_related_body(
            "b1",
            &json!({"name": "x.jpg", "parents": ["draft"]}),
            "image/jpeg",
            b"JPEG",
        );
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--b1\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{"));
        assert!(text.contains("\"parents\":[\"draft\"]"));
        assert!(text.contains("\r\n--b1\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n--b1--\r\n"));
    }
}
