//! Read-only access to previously uploaded source files.

use std::io::ErrorKind;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};

/// Source format, taken from the stored file's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Pdf,
}

/// A resolved source file
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub kind: SourceKind,
    pub bytes: Bytes,
}

/// Lookup of uploaded files by id.
pub trait FileStore: Send + Sync {
    fn resolve(&self, file_id: &str) -> ServiceResult<StoredFile>;
}

/// Extensions tried in order, with the format each one implies.
const EXTENSIONS: [(&str, SourceKind); 4] = [
    ("jpg", SourceKind::Image),
    ("jpeg", SourceKind::Image),
    ("png", SourceKind::Image),
    ("pdf", SourceKind::Pdf),
];

/// Files stored flat as `<data_dir>/<file_id>.<ext>`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileStore for DirectoryStore {
    fn resolve(&self, file_id: &str) -> ServiceResult<StoredFile> {
        let not_found = || ServiceError::InputNotFound {
            file_id: file_id.to_string(),
        };

        if !is_plain_id(file_id) {
            return Err(not_found());
        }

        for (ext, kind) in EXTENSIONS {
            let path = self.root.join(format!("{}.{}", file_id, ext));
            match std::fs::read(&path) {
                Ok(bytes) => {
                    debug!(file_id = file_id, path = %path.display(), size = bytes.len(), "Resolved source file");
                    return Ok(StoredFile {
                        id: file_id.to_string(),
                        kind,
                        bytes: Bytes::from(bytes),
                    });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ServiceError::Internal {
                        message: format!("Failed to read {}: {}", path.display(), e),
                    });
                }
            }
        }

        Err(not_found())
    }
}

/// Ids are single path components without traversal.
fn is_plain_id(file_id: &str) -> bool {
    !file_id.is_empty()
        && !file_id.contains("..")
        && !file_id.contains(['/', '\\'])
        && !file_id.contains('\0')
}
