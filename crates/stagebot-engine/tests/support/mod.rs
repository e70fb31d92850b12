#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use stagebot_contracts::events::EventWriter;
use stagebot_engine::config::{EnhancementParams, PipelineConfig};
use stagebot_engine::enhance::{EnhancementApi, SubmitReply, TaskStatus};
use stagebot_engine::generation::{
    GenerationRequest, GenerationResponse, ImageGenerator, InlineImage, RequestPart, ResponsePart,
};
use stagebot_engine::{
    EnvMap, Enhancer, LocalFolderStore, ObjectStore, Pipeline, RecordingSleeper, SourceFile,
};
use tempfile::TempDir;

pub const GENERATED_DIMS: (u32, u32) = (64, 48);

pub fn png_bytes(width: u32, height: u32, shade: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([shade, 120, 200]))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Temp tree holding a local store, an asset tree, a work dir and an event log.
pub struct Fixture {
    pub temp: TempDir,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let fixture = Self {
            temp: tempfile::tempdir()?,
        };
        for folder in ["inbox", "draft", "archive"] {
            fs::create_dir_all(fixture.store_root().join(folder))?;
        }
        fs::create_dir_all(fixture.assets())?;
        Ok(fixture)
    }

    pub fn store_root(&self) -> PathBuf {
        self.temp.path().join("store")
    }

    pub fn assets(&self) -> PathBuf {
        self.temp.path().join("assets")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir().join("staging")
    }

    pub fn events_path(&self) -> PathBuf {
        self.temp.path().join("events.jsonl")
    }

    pub fn config(&self) -> Result<PipelineConfig> {
        let env = EnvMap::from_pairs([
            (
                "STAGEBOT_ASSETS_DIR",
                self.assets().to_string_lossy().into_owned(),
            ),
            (
                "STAGEBOT_WORK_DIR",
                self.work_dir().to_string_lossy().into_owned(),
            ),
        ]);
        PipelineConfig::from_env(&env)
    }

    pub fn drop_photo(&self, name: &str) -> Result<()> {
        fs::write(self.store_root().join("inbox").join(name), png_bytes(80, 60, 10)?)?;
        Ok(())
    }

    pub fn drop_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.store_root().join("inbox").join(name), bytes)?;
        Ok(())
    }

    pub fn add_reference(&self, room_key: &str, style_key: &str, name: &str, side: u32) -> Result<()> {
        let dir = self.assets().join(room_key).join(style_key);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), png_bytes(side, side, 200)?)?;
        Ok(())
    }

    pub fn add_raw_reference(&self, room_key: &str, style_key: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.assets().join(room_key).join(style_key);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), bytes)?;
        Ok(())
    }

    pub fn folder_files(&self, folder: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.store_root().join(folder))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub fn events(&self) -> Result<Vec<Value>> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(path)?
            .lines()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    pub fn event_count(&self, event_type: &str) -> Result<usize> {
        Ok(self
            .events()?
            .iter()
            .filter(|event| event["type"] == event_type)
            .count())
    }

    pub fn pipeline(
        &self,
        store: FaultyStore,
        generator: ScriptedGenerator,
        enhancement: Option<ScriptedEnhancement>,
        sleeper: &RecordingSleeper,
    ) -> Result<Pipeline> {
        self.pipeline_with(self.config()?, store, generator, enhancement, sleeper)
    }

    pub fn pipeline_with(
        &self,
        config: PipelineConfig,
        store: FaultyStore,
        generator: ScriptedGenerator,
        enhancement: Option<ScriptedEnhancement>,
        sleeper: &RecordingSleeper,
    ) -> Result<Pipeline> {
        let enhancer = Enhancer::with_api(
            enhancement.map(|api| Box::new(api) as Box<dyn EnhancementApi>),
            &config.enhancement,
            Arc::new(sleeper.clone()),
        );
        Ok(Pipeline::new(
            &config,
            Box::new(store),
            Box::new(generator),
            enhancer,
            EventWriter::new(self.events_path(), "test-worker"),
        ))
    }

    pub fn inbox_file(&self, name: &str) -> SourceFile {
        SourceFile {
            id: format!("inbox/{name}"),
            name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
        }
    }
}

/// What a generator call looked like at the moment it was made.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub texts: Vec<String>,
    pub image_dims: Vec<(u32, u32)>,
}

#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failing_calls: Vec<usize>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1-based call numbers that answer with an error.
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            failing_calls: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl ImageGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let mut texts = Vec::new();
        let mut image_dims = Vec::new();
        for part in &request.parts {
            match part {
                RequestPart::Text(text) => texts.push(text.clone()),
                RequestPart::Image(path) => image_dims.push(image::image_dimensions(path)?),
            }
        }
        let number = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| anyhow::anyhow!("call log poisoned"))?;
            calls.push(RecordedCall { texts, image_dims });
            calls.len()
        };
        if self.failing_calls.contains(&number) {
            bail!("scripted failure on call {number}");
        }
        let (width, height) = GENERATED_DIMS;
        Ok(GenerationResponse {
            parts: vec![ResponsePart {
                text: None,
                inline_image: Some(InlineImage {
                    bytes: png_bytes(width, height, number as u8)?,
                    mime_type: Some("image/png".to_string()),
                }),
            }],
        })
    }
}

/// An upscaler whose tasks never leave the pending state.
#[derive(Clone, Default)]
pub struct ScriptedEnhancement {
    polls: Arc<Mutex<u32>>,
}

impl ScriptedEnhancement {
    pub fn polls(&self) -> u32 {
        self.polls.lock().map(|polls| *polls).unwrap_or(0)
    }
}

impl EnhancementApi for ScriptedEnhancement {
    fn submit(&self, _image_base64: &str, _params: &EnhancementParams) -> Result<SubmitReply> {
        Ok(SubmitReply::Queued {
            task_id: "task-1".to_string(),
        })
    }

    fn poll(&self, _task_id: &str) -> Result<TaskStatus> {
        if let Ok(mut polls) = self.polls.lock() {
            *polls += 1;
        }
        Ok(TaskStatus::Pending)
    }

    fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
        bail!("nothing to fetch")
    }
}

/// Local store with injectable faults and a count of archival moves.
#[derive(Clone)]
pub struct FaultyStore {
    inner: LocalFolderStore,
    moves: Arc<Mutex<Vec<String>>>,
    pub fail_list: bool,
    pub fail_download_of: Option<String>,
    pub fail_upload_of: Option<String>,
}

impl FaultyStore {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalFolderStore::new(root),
            moves: Arc::new(Mutex::new(Vec::new())),
            fail_list: false,
            fail_download_of: None,
            fail_upload_of: None,
        }
    }

    pub fn moves(&self) -> Vec<String> {
        self.moves.lock().map(|moves| moves.clone()).unwrap_or_default()
    }
}

impl ObjectStore for FaultyStore {
    fn kind(&self) -> &str {
        "faulty"
    }

    fn list(&self, folder: &str) -> Result<Vec<SourceFile>> {
        if self.fail_list {
            bail!("listing unavailable");
        }
        self.inner.list(folder)
    }

    fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        if self.fail_download_of.as_deref() == Some(file_id) {
            bail!("download of {file_id} refused");
        }
        self.inner.download(file_id)
    }

    fn upload(&self, bytes: &[u8], folder: &str, name: &str) -> Result<String> {
        if self.fail_upload_of.as_deref() == Some(name) {
            bail!("upload of {name} refused");
        }
        self.inner.upload(bytes, folder, name)
    }

    fn move_file(&self, file_id: &str, from: &str, to: &str) -> Result<()> {
        if let Ok(mut moves) = self.moves.lock() {
            moves.push(file_id.to_string());
        }
        self.inner.move_file(file_id, from, to)
    }

    fn folder_name(&self, folder: &str) -> Result<String> {
        self.inner.folder_name(folder)
    }
}
