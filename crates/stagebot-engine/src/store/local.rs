use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::{ObjectStore, SourceFile};
use crate::normalize::mime_for_path;

/// Folders are sub-directories of `root`; file ids are `<folder>/<name>`.
#[derive(Debug, Clone)]
pub struct LocalFolderStore {
    root: PathBuf,
}

impl LocalFolderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_folders(&self, folders: &[&str]) -> Result<()> {
        for folder in folders {
            let dir = self.folder_dir(folder)?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    fn folder_dir(&self, folder: &str) -> Result<PathBuf> {
        ensure_plain_segment("folder", folder)?;
        Ok(self.root.join(folder))
    }

    fn resolve_id(&self, file_id: &str) -> Result<(String, PathBuf)> {
        let Some((folder, name)) = file_id.split_once('/') else {
            bail!("malformed local file id {file_id:?}");
        };
        ensure_plain_segment("file name", name)?;
        Ok((folder.to_string(), self.folder_dir(folder)?.join(name)))
    }
}

fn ensure_plain_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        bail!("invalid {what} {value:?}");
    }
    Ok(())
}

impl ObjectStore for LocalFolderStore {
    fn kind(&self) -> &str {
        "local"
    }

    fn list(&self, folder: &str) -> Result<Vec<SourceFile>> {
        let dir = self.folder_dir(folder)?;
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let mime_type = mime_for_path(Path::new(&name))
                .unwrap_or("application/octet-stream")
                .to_string();
            files.push(SourceFile {
                id: format!("{folder}/{name}"),
                name,
                mime_type,
            });
        }
        files.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(files)
    }

    fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let (_, path) = self.resolve_id(file_id)?;
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn upload(&self, bytes: &[u8], folder: &str, name: &str) -> Result<String> {
        ensure_plain_segment("file name", name)?;
        let dir = self.folder_dir(folder)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(format!("{folder}/{name}"))
    }

    fn move_file(&self, file_id: &str, from: &str, to: &str) -> Result<()> {
        let (folder, source) = self.resolve_id(file_id)?;
        if folder != from {
            bail!("{file_id} is not in folder {from:?}");
        }
        let target_dir = self.folder_dir(to)?;
        fs::create_dir_all(&target_dir)?;
        let file_name = source
            .file_name()
            .context("local file id has no file name")?;
        let target = target_dir.join(file_name);
        fs::rename(&source, &target).with_context(|| {
            format!("failed to move {} to {}", source.display(), target.display())
        })
    }

    fn folder_name(&self, folder: &str) -> Result<String> {
        let dir = self.folder_dir(folder)?;
        if !dir.is_dir() {
            bail!("folder {} does not exist", dir.display());
        }
        Ok(folder.to_string())
    }
}
