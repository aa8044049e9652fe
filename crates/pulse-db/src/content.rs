//! Raw upload storage and checksum verification.
//!
//! Uploads live under `{root}/{bucket}/org/{org_id}/intake/{intake_id}/{filename}`.
//! An intake's `storage_path` may name the file itself or its intake
//! directory; a directory resolves to the first file in name order.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_core::{defaults, ContentStore, Error, Intake, Result};

/// Relative object path for an uploaded file.
pub fn object_path(org_id: &str, intake_id: Uuid, filename: &str) -> String {
    format!("org/{}/intake/{}/{}", org_id, intake_id, filename)
}

/// Hex MD5 digest.
pub fn compute_checksum(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Compare `data` against an expected hex MD5 digest (case-insensitive).
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = compute_checksum(data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}

/// Download an intake's content and verify it against the recorded checksum.
pub async fn download_verified(store: &dyn ContentStore, intake: &Intake) -> Result<Vec<u8>> {
    let expected = intake
        .checksum
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!("intake {} has no recorded checksum", intake.id))
        })?;
    let data = store.download(&intake.storage_path).await?;
    verify_checksum(&data, expected)?;
    debug!(
        subsystem = "db",
        component = "content_store",
        op = "download_verified",
        intake_id = %intake.id,
        size = data.len(),
        "Content checksum verified"
    );
    Ok(data)
}

/// Reject absolute paths and parent traversal.
fn relative_path(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let candidate = Path::new(trimmed);
    if trimmed.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::InvalidInput(format!("invalid storage path '{}'", path)));
    }
    Ok(candidate.to_path_buf())
}

fn not_found(path: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("content at '{}'", path))
    } else {
        Error::Io(e)
    }
}

/// Content store on a local or mounted filesystem.
pub struct FilesystemContentStore {
    root: PathBuf,
    bucket: String,
}

impl FilesystemContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bucket: defaults::CONTENT_BUCKET.to_string(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(&self.bucket).join(relative_path(path)?))
    }

    /// First regular, non-hidden file in a directory by name.
    async fn first_file(dir: &Path) -> Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files.into_iter().next())
    }
}

#[async_trait]
impl ContentStore for FilesystemContentStore {
    async fn download(&self, storage_path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(storage_path)?;
        let meta = fs::metadata(&full_path)
            .await
            .map_err(|e| not_found(storage_path, e))?;

        let file = if meta.is_dir() {
            Self::first_file(&full_path).await?.ok_or_else(|| {
                Error::NotFound(format!("no files under '{}'", storage_path))
            })?
        } else {
            full_path
        };

        debug!(
            subsystem = "db",
            component = "content_store",
            op = "download",
            storage_path,
            file = %file.display(),
            "Reading intake content"
        );
        fs::read(&file).await.map_err(|e| not_found(storage_path, e))
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "content_store: create_dir_all failed");
                e
            })?;
        }

        // Write beside the target, then rename into place.
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &full_path).await?;
        Ok(())
    }
}
