use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::http::response_json_or_error;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a Google service-account key file the worker uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading service account key {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid service account key {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(raw)?;
        if key.client_email.trim().is_empty() {
            return Err(anyhow!("client_email is empty"));
        }
        Ok(key)
    }

    pub fn token_uri(&self) -> &str {
        self.token_uri
            .as_deref()
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Exchanges signed JWT assertions for OAuth access tokens and caches them
/// until shortly before expiry.
pub(crate) struct TokenSource {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
    http: HttpClient,
    request_timeout: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub(crate) fn new(key: ServiceAccountKey, scope: &str, request_timeout: Duration) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM")?;
        Ok(Self {
            key,
            signing_key,
            scope: scope.to_string(),
            http: HttpClient::new(),
            request_timeout,
            cached: Mutex::new(None),
        })
    }

    pub(crate) fn email(&self) -> &str {
        &self.key.client_email
    }

    pub(crate) fn access_token(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow!("token cache lock poisoned"))?;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch_token(now)?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    fn assertion(&self, now: i64) -> Result<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: self.key.token_uri(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("failed to sign service account assertion")
    }

    fn fetch_token(&self, now: i64) -> Result<CachedToken> {
        let assertion = self.assertion(now)?;
        let token_uri = self.key.token_uri();
        let response = self
            .http
            .post(token_uri)
            .timeout(self.request_timeout)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .with_context(|| format!("token request failed ({token_uri})"))?;
        let payload = response_json_or_error("Google OAuth", response)?;
        let token = parse_token(&payload, now)?;
        debug!(email = %self.key.client_email, expires_at = token.expires_at, "access token refreshed");
        Ok(token)
    }
}

fn parse_token(payload: &Value, now: i64) -> Result<CachedToken> {
    let value = payload
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| anyhow!("token response has no access_token"))?;
    let expires_in = payload
        .get("expires_in")
        .and_then(Value::as_i64)
        .unwrap_or(ASSERTION_LIFETIME_SECS);
    Ok(CachedToken {
        value: value.to_string(),
        expires_at: now + expires_in,
    })
}
