use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use stagebot_contracts::events::{EventWriter, WorkerEvent};
use stagebot_contracts::identity::JobIdentity;
use stagebot_contracts::jobs::{JobOutcome, VariantReport, VariantStatus};
use tracing::{info, warn};

use crate::config::{FolderIds, PipelineConfig};
use crate::enhance::Enhancer;
use crate::generation::{GenerationStages, ImageGenerator, Stage};
use crate::http::error_chain_text;
use crate::normalize::{normalize_in_place, prepare_reference};
use crate::reference::ReferenceResolver;
use crate::store::{ObjectStore, SourceFile};

const REFERENCE_STAGING_NAME: &str = "reference.jpg";
/// Sub-directory of the work dir that each job clears and refills.
pub const STAGING_SUBDIR: &str = "staging";

/// Takes one inbox file from identity to archive.
///
/// The staging directory belongs to the file being processed: it is emptied
/// before the file starts and again after it ends, whatever the outcome.
pub struct Pipeline {
    store: Box<dyn ObjectStore>,
    generator: Box<dyn ImageGenerator>,
    enhancer: Enhancer,
    resolver: ReferenceResolver,
    folders: FolderIds,
    variants: u32,
    staging_dir: PathBuf,
    events: EventWriter,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        store: Box<dyn ObjectStore>,
        generator: Box<dyn ImageGenerator>,
        enhancer: Enhancer,
        events: EventWriter,
    ) -> Self {
        Self {
            store,
            generator,
            enhancer,
            resolver: ReferenceResolver::new(&config.assets_dir),
            folders: config.folders.clone(),
            variants: config.variants,
            staging_dir: config.work_dir.join(STAGING_SUBDIR),
            events,
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn folders(&self) -> &FolderIds {
        &self.folders
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Errors are store or local I/O faults; every expected failure mode is
    /// a `JobOutcome`.
    pub fn process_file(&self, file: &SourceFile) -> Result<JobOutcome> {
        self.reset_staging()?;
        let result = self.run_job(file);
        if let Err(err) = self.reset_staging() {
            warn!(error = %error_chain_text(&err, 300), "staging cleanup failed");
        }
        result
    }

    fn run_job(&self, file: &SourceFile) -> Result<JobOutcome> {
        let identity = JobIdentity::from_file_name(&file.name);
        info!(file = %file.name, %identity, "job started");
        self.emit(WorkerEvent::JobStarted {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            identity: identity.clone(),
        });

        let resolved = self
            .resolver
            .resolve(&identity.room, &identity.style, &identity.variant);
        let Some(reference) = resolved else {
            let searched = self.resolver.directory_for(&identity.room, &identity.style);
            warn!(file = %file.name, dir = %searched.display(), "no style reference; archiving without output");
            self.emit(WorkerEvent::ReferenceMissing {
                file_name: file.name.clone(),
                searched: searched.display().to_string(),
            });
            self.archive(file)?;
            return Ok(JobOutcome::NoReference { identity });
        };

        let source = self.download_source(file)?;
        let stages = GenerationStages::new(self.generator.as_ref(), &self.staging_dir);

        let empty_room = match stages.empty_room(&source) {
            Ok(path) => {
                self.stage_finished(Stage::EmptyRoom, None, &path);
                path
            }
            Err(err) => {
                warn!(file = %file.name, error = %err, "empty room failed; leaving file in inbox");
                self.emit(WorkerEvent::JobAbandoned {
                    file_name: file.name.clone(),
                    reason: err.to_string(),
                });
                return Ok(JobOutcome::EmptyRoomFailed {
                    identity,
                    reason: err.to_string(),
                });
            }
        };

        let reference = self.stage_reference(&reference);
        let variants = (1..=self.variants)
            .map(|index| self.run_variant(&stages, &identity, &empty_room, reference.as_deref(), index))
            .collect::<Vec<_>>();

        self.archive(file)?;
        Ok(JobOutcome::Completed { identity, variants })
    }

    fn download_source(&self, file: &SourceFile) -> Result<PathBuf> {
        let bytes = self
            .store
            .download(&file.id)
            .with_context(|| format!("download of {} failed", file.name))?;
        let local = self.staging_dir.join(staged_source_name(&file.name));
        fs::write(&local, bytes)
            .with_context(|| format!("failed to write {}", local.display()))?;
        Ok(normalize_in_place(&local).into_value())
    }

    /// A reference that cannot be decoded is dropped from the furnish request
    /// rather than failing the job.
    fn stage_reference(&self, reference: &Path) -> Option<PathBuf> {
        let dest = self.staging_dir.join(REFERENCE_STAGING_NAME);
        match prepare_reference(reference, &dest) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(
                    reference = %reference.display(),
                    error = %error_chain_text(&err, 300),
                    "reference unreadable; furnishing without it"
                );
                None
            }
        }
    }

    fn run_variant(
        &self,
        stages: &GenerationStages<'_>,
        identity: &JobIdentity,
        empty_room: &Path,
        reference: Option<&Path>,
        index: u32,
    ) -> VariantReport {
        let furnished = match stages.furnish(empty_room, reference) {
            Ok(path) => {
                self.stage_finished(Stage::Furnish, Some(index), &path);
                path
            }
            Err(err) => {
                warn!(variant = index, error = %err, "furnish failed; skipping variant");
                self.emit(WorkerEvent::VariantSkipped {
                    variant: index,
                    name: None,
                    reason: err.to_string(),
                });
                return VariantReport {
                    index,
                    status: VariantStatus::FurnishFailed {
                        reason: err.to_string(),
                    },
                };
            }
        };

        let enhanced = self.enhancer.enhance(&furnished);
        let enhancement = enhanced.reason().cloned();
        if let Some(reason) = &enhancement {
            self.emit(WorkerEvent::EnhancementDegraded {
                variant: index,
                reason: reason.clone(),
            });
        }

        let name = identity.render_name(index);
        let status = match self.upload(enhanced.value(), &name) {
            Ok(file_id) => {
                info!(variant = index, %name, "render uploaded");
                self.emit(WorkerEvent::VariantUploaded {
                    variant: index,
                    name: name.clone(),
                    file_id: file_id.clone(),
                    enhanced: enhancement.is_none(),
                });
                VariantStatus::Uploaded {
                    name,
                    file_id,
                    enhancement,
                }
            }
            Err(err) => {
                let reason = error_chain_text(&err, 300);
                warn!(variant = index, %name, %reason, "upload failed");
                self.emit(WorkerEvent::VariantSkipped {
                    variant: index,
                    name: Some(name.clone()),
                    reason: reason.clone(),
                });
                VariantStatus::UploadFailed { name, reason }
            }
        };
        VariantReport { index, status }
    }

    fn upload(&self, path: &Path, name: &str) -> Result<String> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        self.store.upload(&bytes, &self.folders.draft, name)
    }

    fn archive(&self, file: &SourceFile) -> Result<()> {
        self.store
            .move_file(&file.id, &self.folders.inbox, &self.folders.archive)
            .with_context(|| format!("archiving {} failed", file.name))?;
        info!(file = %file.name, "archived");
        self.emit(WorkerEvent::JobArchived {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
        });
        Ok(())
    }

    fn reset_staging(&self) -> Result<()> {
        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)
                .with_context(|| format!("failed to clear {}", self.staging_dir.display()))?;
        }
        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("failed to create {}", self.staging_dir.display()))
    }

    fn stage_finished(&self, stage: Stage, variant: Option<u32>, output: &Path) {
        self.emit(WorkerEvent::StageFinished {
            stage: stage.as_str().to_string(),
            variant,
            output: output.display().to_string(),
        });
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        if let Err(err) = self.events.record(&event) {
            warn!(?event, error = %err, "event write failed");
        }
    }
}

/// Local name for a downloaded source: path separators and other unsafe
/// characters replaced, prefixed so it never collides with stage outputs.
pub fn staged_source_name(remote_name: &str) -> String {
    let cleaned: String = remote_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '(' | ')') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "source_input".to_string()
    } else {
        format!("source_{cleaned}")
    }
}
