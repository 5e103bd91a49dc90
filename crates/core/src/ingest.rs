use crate::error::IngestError;
use crate::models::{DocumentFormat, Upload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    pub max_bytes: u64,
}

impl UploadPolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Checks size, then extension, and returns the resolved format.
    pub fn check(&self, upload: &Upload) -> Result<DocumentFormat, IngestError> {
        let size = upload.bytes.len() as u64;
        if size > self.max_bytes {
            return Err(IngestError::FileTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        DocumentFormat::from_filename(&upload.filename)
    }
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub directory: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(
        &self,
        upload: &Upload,
        document_id: &str,
    ) -> Result<StoredUpload, IngestError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let checksum = digest_bytes(&upload.bytes);
        let path = self.dir.join(stored_file_name(
            &upload.filename,
            document_id,
            &checksum,
            Utc::now(),
        ));
        tokio::fs::write(&path, &upload.bytes).await?;

        debug!(path = %path.display(), bytes = upload.bytes.len(), "stored upload");
        Ok(StoredUpload { path, checksum })
    }

    pub async fn remove(&self, stored: &StoredUpload) {
        if let Err(error) = tokio::fs::remove_file(&stored.path).await {
            warn!(path = %stored.path.display(), %error, "failed to delete processed upload");
        }
    }

    /// Deletes uploads last modified more than `max_age` ago.
    pub fn purge_older_than(&self, max_age: Duration) -> Result<usize, IngestError> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut deleted = 0;

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry.metadata().ok().and_then(|meta| meta.modified().ok());
            if modified.is_some_and(|modified| modified <= cutoff) {
                fs::remove_file(entry.path())?;
                deleted += 1;
            }
        }

        info!(deleted, dir = %self.dir.display(), "purged old uploads");
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<StorageStats, IngestError> {
        let mut stats = StorageStats {
            directory: self.dir.clone(),
            file_count: 0,
            total_bytes: 0,
        };
        if !self.dir.exists() {
            return Ok(stats);
        }

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if entry.file_type().is_file() {
                stats.file_count += 1;
                stats.total_bytes += entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            }
        }
        Ok(stats)
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// `{stem}_{timestamp}_{hash8}_{document_id}.{ext}`; the client's directory part is dropped.
fn stored_file_name(
    filename: &str,
    document_id: &str,
    checksum: &str,
    now: DateTime<Utc>,
) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("upload");
    let stamp = now.format("%Y%m%d_%H%M%S");
    let short_hash: String = checksum.chars().take(8).collect();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!(
            "{stem}_{stamp}_{short_hash}_{document_id}.{}",
            ext.to_ascii_lowercase()
        ),
        None => format!("{stem}_{stamp}_{short_hash}_{document_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            filename: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn oversized_upload_is_rejected_with_limit() {
        let policy = UploadPolicy::new(4);
        let error = policy.check(&upload("paper.xyz", b"12345")).unwrap_err();
        assert!(matches!(error, IngestError::FileTooLarge { size: 5, limit: 4 }));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let policy = UploadPolicy::new(1024);
        assert!(matches!(
            policy.check(&upload("data.xyz", b"abc")),
            Err(IngestError::UnsupportedFormat { .. })
        ));
        assert_eq!(
            policy.check(&upload("notes.md", b"# hi")).unwrap(),
            DocumentFormat::Markdown
        );
    }

    #[test]
    fn stored_names_are_flat_and_carry_the_document_id() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let name = stored_file_name("../../etc/Paper.PDF", "doc-1", "abcdef0123456789", now);
        assert_eq!(name, "Paper_20240301_123005_abcdef01_doc-1.pdf");
    }

    #[test]
    fn identical_uploads_in_one_second_get_distinct_names() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let first = stored_file_name("paper.txt", "doc-1", "abcdef0123456789", now);
        let second = stored_file_name("paper.txt", "doc-2", "abcdef0123456789", now);
        assert_ne!(first, second);
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[tokio::test]
    async fn save_and_remove_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = UploadStore::new(dir.path().join("uploads"));

        let stored = store.save(&upload("a.txt", b"hello"), "doc-1").await?;
        assert!(stored.path.exists());
        assert_eq!(store.stats()?.file_count, 1);
        assert_eq!(store.stats()?.total_bytes, 5);

        store.remove(&stored).await;
        assert!(!stored.path.exists());
        Ok(())
    }

    #[test]
    fn purge_keeps_recent_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("recent.txt"), b"x")?;
        let store = UploadStore::new(dir.path());

        assert_eq!(store.purge_older_than(Duration::from_secs(3600))?, 0);
        assert_eq!(store.purge_older_than(Duration::ZERO)?, 1);
        assert_eq!(store.stats()?.file_count, 0);
        Ok(())
    }
}
