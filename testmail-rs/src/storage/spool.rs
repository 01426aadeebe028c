use crate::error::{MailError, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

/// Per-process sequence keeping concurrent temp names distinct
static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Content-addressed store for accepted SMTP messages.
///
/// Each message is written once as `<receive_dir>/<sha256 hex>`; storing the
/// same bytes twice leaves a single file.
pub struct Spool {
    base_path: PathBuf,
}

impl Spool {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Persist `data` and return the path it was written to.
    pub async fn store(&self, data: &[u8]) -> Result<PathBuf> {
        self.ensure_directory().await?;

        let name = content_hash(data);
        let tmp_path = self.base_path.join(format!(
            ".{}.{}.{}.tmp",
            name,
            std::process::id(),
            TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        let final_path = self.base_path.join(&name);

        // Write beside the target first, then rename (atomic on one filesystem)
        fs::write(&tmp_path, data).await.map_err(|e| {
            MailError::Storage(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                warn!("Failed to remove {}: {}", tmp_path.display(), cleanup);
            }
            // Same content already stored under this name
            if fs::try_exists(&final_path).await.unwrap_or(false) {
                debug!("{} already stored", final_path.display());
                return Ok(final_path);
            }
            return Err(MailError::Storage(format!(
                "Failed to move {}: {}",
                final_path.display(),
                e
            )));
        }

        info!("Stored message as {} ({} bytes)", final_path.display(), data.len());
        Ok(final_path)
    }

    async fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            MailError::Storage(format!(
                "Failed to create directory {}: {}",
                self.base_path.display(),
                e
            ))
        })
    }
}

/// Lower-case hex SHA-256 of `data`
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_store_names_file_by_hash() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(dir.path().join("received"));

        let data = b"Subject: hi\r\n\r\nbody\r\n";
        let path = spool.store(data).await.unwrap();

        assert_eq!(path, dir.path().join("received").join(content_hash(data)));
        assert_eq!(std::fs::read(&path).unwrap(), data.to_vec());
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let spool = Spool::new(dir.path());

        spool.store(b"same").await.unwrap();
        spool.store(b"same").await.unwrap();

        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_identical_stores_all_succeed() {
        let dir = TempDir::new().unwrap();
        let spool = Arc::new(Spool::new(dir.path()));
        let data = Arc::new(vec![b'x'; 4 * 1024 * 1024]);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let spool = spool.clone();
                let data = data.clone();
                tokio::spawn(async move { spool.store(&data).await })
            })
            .collect();

        for handle in handles {
            let path = handle.await.unwrap().unwrap();
            assert_eq!(path, dir.path().join(content_hash(&data)));
        }

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![content_hash(&data)]);
    }
}
