mod dryrun;
mod gemini;
pub mod prompts;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::http::error_chain_text;
use crate::normalize::normalize_in_place;

pub use dryrun::DryrunGenerator;
pub use gemini::GeminiGenerator;

use prompts::{EMPTY_ROOM_INSTRUCTIONS, EMPTY_ROOM_LABEL, FURNISH_INSTRUCTIONS, REFERENCE_LABEL};

/// One element of an ordered multimodal prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    Image(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub parts: Vec<RequestPart>,
}

impl GenerationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(RequestPart::Text(text.into()));
        self
    }

    pub fn image(mut self, path: impl Into<PathBuf>) -> Self {
        self.parts.push(RequestPart::Image(path.into()));
        self
    }

    pub fn images(&self) -> impl Iterator<Item = &Path> {
        self.parts.iter().filter_map(|part| match part {
            RequestPart::Image(path) => Some(path.as_path()),
            RequestPart::Text(_) => None,
        })
    }

    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                RequestPart::Text(text) => Some(text.as_str()),
                RequestPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsePart {
    pub text: Option<String>,
    pub inline_image: Option<InlineImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResponse {
    pub parts: Vec<ResponsePart>,
}

impl GenerationResponse {
    pub fn first_image(&self) -> Option<&InlineImage> {
        self.parts
            .iter()
            .filter_map(|part| part.inline_image.as_ref())
            .find(|image| !image.bytes.is_empty())
    }

    fn text_note(&self) -> Option<String> {
        let text = self
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!text.is_empty()).then_some(text)
    }
}

/// A generative image service: one synchronous call, image(s) + text in,
/// parts out.
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Box<dyn ImageGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: ImageGenerator + 'static>(&mut self, generator: G) {
        self.generators
            .insert(generator.name().to_string(), Box::new(generator));
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn ImageGenerator>> {
        self.generators.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}

pub fn default_generator_registry(config: &crate::config::GenerationConfig) -> GeneratorRegistry {
    let mut generators = GeneratorRegistry::new();
    generators.register(DryrunGenerator);
    generators.register(GeminiGenerator::new(config));
    generators
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    EmptyRoom,
    Furnish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyRoom => "empty_room",
            Self::Furnish => "furnish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generation stage that produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("{stage} request failed: {detail}")]
    Service { stage: Stage, detail: String },
    #[error("{stage} response had no image{}", .note.as_deref().map(|text| format!(" ({text})")).unwrap_or_default())]
    NoImage { stage: Stage, note: Option<String> },
    #[error("{stage} output could not be written: {detail}")]
    Write { stage: Stage, detail: String },
}

/// Runs the two generation stages against one generator, writing outputs
/// into the job's staging directory.
pub struct GenerationStages<'a> {
    generator: &'a dyn ImageGenerator,
    staging_dir: &'a Path,
}

impl<'a> GenerationStages<'a> {
    pub fn new(generator: &'a dyn ImageGenerator, staging_dir: &'a Path) -> Self {
        Self {
            generator,
            staging_dir,
        }
    }

    /// Room photo in, normalized empty-room image out.
    pub fn empty_room(&self, room_photo: &Path) -> Result<PathBuf, StageError> {
        let request = GenerationRequest::new()
            .text(EMPTY_ROOM_INSTRUCTIONS)
            .image(room_photo);
        self.run(Stage::EmptyRoom, &request, self.staging_dir.join("empty_room.jpg"))
    }

    /// Empty room (+ reference when there is one) in, normalized furnished
    /// image out. Each call writes a fresh file name.
    pub fn furnish(
        &self,
        empty_room: &Path,
        reference: Option<&Path>,
    ) -> Result<PathBuf, StageError> {
        let mut request = GenerationRequest::new()
            .text(FURNISH_INSTRUCTIONS)
            .text(EMPTY_ROOM_LABEL)
            .image(empty_room);
        if let Some(reference) = reference {
            request = request.text(REFERENCE_LABEL).image(reference);
        }
        let unique = Uuid::new_v4().simple().to_string();
        let output = self
            .staging_dir
            .join(format!("furnished_{}.jpg", &unique[..6]));
        self.run(Stage::Furnish, &request, output)
    }

    fn run(
        &self,
        stage: Stage,
        request: &GenerationRequest,
        output: PathBuf,
    ) -> Result<PathBuf, StageError> {
        debug!(%stage, generator = self.generator.name(), "generation request");
        let response = self
            .generator
            .generate(request)
            .map_err(|err| StageError::Service {
                stage,
                detail: error_chain_text(&err, 400),
            })?;
        let Some(image) = response.first_image() else {
            return Err(StageError::NoImage {
                stage,
                note: response.text_note(),
            });
        };
        fs::write(&output, &image.bytes).map_err(|err| StageError::Write {
            stage,
            detail: format!("{}: {err}", output.display()),
        })?;
        let normalized = normalize_in_place(&output);
        if let Some(reason) = normalized.reason() {
            warn!(%stage, %reason, "continuing with un-normalized output");
        }
        Ok(normalized.into_value())
    }
}
