use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAGNIFIC_ENDPOINT: &str = "https://api.freepik.com/v1/ai/image-upscaler";
pub const LOCAL_SERVICE_ACCOUNT_FILE: &str = "service_account.json";
pub const HOSTED_SERVICE_ACCOUNT_FILE: &str = "/etc/secrets/service_account.json";
/// Renders per source are named `render(1)` through `render(3)`.
pub const MAX_VARIANTS: u32 = 3;

/// Snapshot of the variables the worker is configured from: a `.env` file
/// underneath the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvMap {
    vars: BTreeMap<String, String>,
}

impl EnvMap {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Reads `dotenv` (when it exists) and lets the process environment win.
    pub fn load(dotenv: Option<&Path>) -> Self {
        let mut vars = dotenv.map(parse_dotenv).unwrap_or_default();
        vars.extend(std::env::vars());
        Self { vars }
    }

    /// Trimmed, non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn number_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .with_context(|| format!("{key} must be a number, got {raw:?}")),
            None => Ok(default),
        }
    }
}

fn parse_dotenv(path: &Path) -> BTreeMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut vars = BTreeMap::new();
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

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderIds {
    pub inbox: String,
    pub draft: String,
    pub archive: String,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_base: String,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub request_timeout: Duration,
}

/// Fixed upscaler request parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementParams {
    pub scale_factor: String,
    pub optimized_for: String,
    pub prompt: String,
    pub creativity: i64,
    pub hdr: i64,
    pub resemblance: i64,
    pub fractality: i64,
    pub engine: String,
}

impl Default for EnhancementParams {
    fn default() -> Self {
        Self {
            scale_factor: "2x".to_string(),
            optimized_for: "standard".to_string(),
            prompt: "realistic interior, highly detailed, photorealistic".to_string(),
            creativity: 1,
            hdr: 2,
            resemblance: 4,
            fractality: 2,
            engine: "automatic".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnhancementConfig {
    pub endpoint: String,
    pub api_key: Option<ApiKey>,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub request_timeout: Duration,
    pub params: EnhancementParams,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MAGNIFIC_ENDPOINT.to_string(),
            api_key: None,
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
            request_timeout: Duration::from_secs(120),
            params: EnhancementParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub idle_interval: Duration,
    pub cooldown_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(10),
            cooldown_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAccountSource {
    Found(PathBuf),
    Missing { searched: Vec<PathBuf> },
}

impl ServiceAccountSource {
    pub fn discover(candidates: &[PathBuf]) -> Self {
        match candidates.iter().find(|candidate| candidate.is_file()) {
            Some(found) => Self::Found(found.clone()),
            None => Self::Missing {
                searched: candidates.to_vec(),
            },
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Found(path) => Some(path),
            Self::Missing { .. } => None,
        }
    }

    /// Human-readable explanation of where the key was looked for.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Found(path) => format!("service account key: {}", path.display()),
            Self::Missing { searched } => {
                let places = searched
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "service account key not found (searched: {places}); \
                     set GOOGLE_SERVICE_ACCOUNT_FILE or register the secret file"
                )
            }
        }
    }
}

/// Everything the worker needs, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub folders: FolderIds,
    pub assets_dir: PathBuf,
    pub work_dir: PathBuf,
    pub variants: u32,
    pub generation: GenerationConfig,
    pub enhancement: EnhancementConfig,
    pub watch: WatchConfig,
    pub service_account: ServiceAccountSource,
}

impl PipelineConfig {
    pub fn from_env(env: &EnvMap) -> Result<Self> {
        let mut candidates = Vec::new();
        if let Some(explicit) = env.get("GOOGLE_SERVICE_ACCOUNT_FILE") {
            candidates.push(PathBuf::from(explicit));
        }
        candidates.push(PathBuf::from(LOCAL_SERVICE_ACCOUNT_FILE));
        candidates.push(PathBuf::from(HOSTED_SERVICE_ACCOUNT_FILE));

        let enhancement_defaults = EnhancementConfig::default();
        let watch_defaults = WatchConfig::default();
        let variants = env.number_or("STAGEBOT_VARIANTS", MAX_VARIANTS)?;
        if !(1..=MAX_VARIANTS).contains(&variants) {
            bail!("STAGEBOT_VARIANTS must be between 1 and {MAX_VARIANTS}, got {variants}");
        }

        Ok(Self {
            folders: FolderIds {
                inbox: env.string_or("STAGEBOT_INBOX_FOLDER", "inbox"),
                draft: env.string_or("STAGEBOT_DRAFT_FOLDER", "draft"),
                archive: env.string_or("STAGEBOT_ARCHIVE_FOLDER", "archive"),
            },
            assets_dir: PathBuf::from(env.string_or("STAGEBOT_ASSETS_DIR", "assets")),
            work_dir: PathBuf::from(env.string_or("STAGEBOT_WORK_DIR", "temp_work")),
            variants,
            generation: GenerationConfig {
                api_base: env
                    .string_or("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: env
                    .first_of(&["NANOBANANA_API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"])
                    .map(ApiKey::new),
                model: env.string_or("STAGEBOT_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
                request_timeout: Duration::from_secs(
                    env.number_or("STAGEBOT_GENERATION_TIMEOUT_SECONDS", 180u64)?,
                ),
            },
            enhancement: EnhancementConfig {
                endpoint: env
                    .string_or("MAGNIFIC_ENDPOINT", DEFAULT_MAGNIFIC_ENDPOINT)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: env.get("MAGNIFIC_API_KEY").map(ApiKey::new),
                ..enhancement_defaults
            },
            watch: WatchConfig {
                idle_interval: Duration::from_secs(
                    env.number_or("STAGEBOT_IDLE_SECONDS", watch_defaults.idle_interval.as_secs())?,
                ),
                cooldown_interval: Duration::from_secs(env.number_or(
                    "STAGEBOT_COOLDOWN_SECONDS",
                    watch_defaults.cooldown_interval.as_secs(),
                )?),
            },
            service_account: ServiceAccountSource::discover(&candidates),
        })
    }
}
