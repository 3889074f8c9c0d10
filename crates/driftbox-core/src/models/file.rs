use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Broad content category used by commit metadata and UI rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Pdf,
    Audio,
    Video,
    Text,
    Other,
}

impl FileKind {
    /// Infer a kind from a MIME type.
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type.to_ascii_lowercase();
        if mime.starts_with("image/") {
            FileKind::Image
        } else if mime == "application/pdf" {
            FileKind::Pdf
        } else if mime.starts_with("audio/") {
            FileKind::Audio
        } else if mime.starts_with("video/") {
            FileKind::Video
        } else if mime.starts_with("text/") {
            FileKind::Text
        } else {
            FileKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Pdf => "pdf",
            FileKind::Audio => "audio",
            FileKind::Video => "video",
            FileKind::Text => "text",
            FileKind::Other => "other",
        }
    }
}

impl Display for FileKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl From<&str> for FileKind {
    fn from(s: &str) -> Self {
        match s {
            "image" => FileKind::Image,
            "pdf" => FileKind::Pdf,
            "audio" => FileKind::Audio,
            "video" => FileKind::Video,
            "text" => FileKind::Text,
            _ => FileKind::Other,
        }
    }
}

/// Descriptive metadata for one content hash.
///
/// `storage_id` / `storage_provider_id` are only set once an upload has been committed
/// to remote storage. `ref_count` and `deleted` belong to the garbage collector; the
/// transfer queue never touches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub hash: String,
    pub name: String,
    pub mime_type: String,
    pub kind: FileKind,
    pub size_bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub page_count: Option<u32>,
    pub storage_id: Option<String>,
    pub storage_provider_id: Option<String>,
    pub ref_count: i64,
    pub deleted: bool,
    /// Logical clock bumped on every mutation.
    pub clock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileMeta {
    /// Fresh metadata for a locally known file that has not been uploaded yet.
    pub fn new(
        hash: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let mime_type = mime_type.into();
        let now = Utc::now();
        Self {
            hash: hash.into(),
            name: name.into(),
            kind: FileKind::from_mime(&mime_type),
            mime_type,
            size_bytes,
            width: None,
            height: None,
            page_count: None,
            storage_id: None,
            storage_provider_id: None,
            ref_count: 0,
            deleted: false,
            clock: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_in_remote_storage(&self) -> bool {
        self.storage_id.is_some()
    }
}

/// Locally cached bytes for a content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBlob {
    pub hash: String,
    pub data: Bytes,
    pub created_at: DateTime<Utc>,
}

impl FileBlob {
    pub fn new(hash: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            hash: hash.into(),
            data: data.into(),
            created_at: Utc::now(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}
