use std::fs;
use std::path::{Path, PathBuf};

use stagebot_contracts::catalog::{room_key, style_key};

const REFERENCE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Finds the style reference ("moodboard") for a room/style/variant in the
/// local asset tree `<root>/<room_key>/<style_key>/`.
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    root: PathBuf,
}

impl ReferenceResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory_for(&self, room: &str, style: &str) -> PathBuf {
        self.root.join(room_key(room)).join(style_key(style))
    }

    /// Eligible reference files of a room/style, ordered by file name.
    pub fn candidates(&self, room: &str, style: &str) -> Vec<PathBuf> {
        let dir = self.directory_for(room, style);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| is_reference_file(name))
            .collect();
        names.sort();
        names.into_iter().map(|name| dir.join(name)).collect()
    }

    /// First candidate with a digit run equal to `variant`, else the first
    /// candidate, else `None`. A missing style never borrows another style's
    /// reference.
    pub fn resolve(&self, room: &str, style: &str, variant: &str) -> Option<PathBuf> {
        let candidates = self.candidates(room, style);
        candidates
            .iter()
            .find(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| digit_runs(name).any(|run| run == variant))
                    .unwrap_or(false)
            })
            .or_else(|| candidates.first())
            .cloned()
    }
}

fn is_reference_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            REFERENCE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Maximal runs of ASCII digits in `text`, left to right.
fn digit_runs(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter(|run| !run.is_empty())
}
