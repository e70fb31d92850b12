mod drive;
mod local;
mod service_account;

use anyhow::Result;
use serde::Serialize;

pub use drive::DriveStore;
pub use local::LocalFolderStore;
pub use service_account::ServiceAccountKey;

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

impl SourceFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.contains("image")
    }
}

/// Remote folders the worker reads from and writes to. Folder arguments are
/// store-specific ids.
pub trait ObjectStore: Send + Sync {
    fn kind(&self) -> &str;
    fn list(&self, folder: &str) -> Result<Vec<SourceFile>>;
    fn download(&self, file_id: &str) -> Result<Vec<u8>>;
    /// Returns the id of the created file.
    fn upload(&self, bytes: &[u8], folder: &str, name: &str) -> Result<String>;
    fn move_file(&self, file_id: &str, from: &str, to: &str) -> Result<()>;
    fn folder_name(&self, folder: &str) -> Result<String>;
    /// The principal the store acts as, when it has one.
    fn account(&self) -> Option<&str> {
        None
    }
}
