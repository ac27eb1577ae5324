use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::ServerError;

/// How many fresh names to try when a timestamp-prefixed name is taken.
const NAME_ATTEMPTS: usize = 8;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let relative = target
        .strip_prefix(&canonical_base)
        .or_else(|_| target.strip_prefix(base))
        .unwrap_or(target);

    let mut resolved = canonical_base.clone();
    for component in relative.components() {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// Reduce a client-supplied file name to a safe single path component.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Attachment blobs on local disk, one file per upload.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
    /// Bound on writing one attachment; a file that misses it is removed.
    write_timeout: Duration,
}

impl BlobStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        write_timeout: Duration,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create attachment directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Attachment store initialized");

        Ok(Self {
            base_path,
            max_size,
            write_timeout,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Write an attachment under `<nanos>_<sanitized name>` and return its
    /// path below the configured directory. Never overwrites an existing file.
    pub async fn store_attachment(
        &self,
        file_name: &str,
        data: &[u8],
    ) -> Result<PathBuf, ServerError> {
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let safe_name = sanitize_file_name(file_name);

        for _ in 0..NAME_ATTEMPTS {
            let name = format!("{}_{}", unix_nanos(), safe_name);
            let path = ensure_within(&self.base_path, &self.base_path.join(&name))?;

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(ServerError::Storage(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            let written = tokio::time::timeout(self.write_timeout, async {
                file.write_all(data).await?;
                file.flush().await
            })
            .await;

            let failure = match written {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {:?}", self.write_timeout)),
            };

            if let Some(reason) = failure {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(ServerError::Storage(format!(
                    "Failed to write {}: {}",
                    path.display(),
                    reason
                )));
            }

            debug!(path = %path.display(), size = data.len(), "Stored attachment");
            return Ok(self.base_path.join(name));
        }

        Err(ServerError::Storage(format!(
            "No free name for attachment '{safe_name}'"
        )))
    }

    pub async fn remove(&self, path: &Path) -> Result<(), ServerError> {
        let path = ensure_within(&self.base_path, path)?;
        fs::remove_file(&path).await.map_err(|e| {
            ServerError::Storage(format!("Failed to delete {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "Deleted attachment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf(), 1024, Duration::from_secs(5))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let (store, _dir) = test_store().await;

        let path = store.store_attachment("notes.txt", b"hello").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"hello");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_notes.txt"));

        store.remove(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_paths() {
        let (store, _dir) = test_store().await;

        let first = store.store_attachment("a.png", b"1").await.unwrap();
        let second = store.store_attachment("a.png", b"2").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read(&first).await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_traversal_name_stays_inside() {
        let (store, dir) = test_store().await;

        let path = store
            .store_attachment("../../etc/passwd", b"x")
            .await
            .unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(path.to_string_lossy().ends_with("_passwd"));
    }

    #[tokio::test]
    async fn test_oversized_rejected() {
        let (store, _dir) = test_store().await;
        let data = vec![0u8; 2048];
        assert!(matches!(
            store.store_attachment("big.bin", &data).await,
            Err(ServerError::PayloadTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_write_timeout_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let size = 16 * 1024 * 1024;
        let store = BlobStore::new(dir.path().to_path_buf(), size, Duration::ZERO)
            .await
            .unwrap();

        let data = vec![7u8; size];
        let result = store.store_attachment("big.bin", &data).await;

        assert!(matches!(result, Err(ServerError::Storage(ref m)) if m.contains("timed out")));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report final.pdf"), "report_final.pdf");
        assert_eq!(sanitize_file_name("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_file_name("..."), "attachment");
        assert_eq!(sanitize_file_name(""), "attachment");
    }
}
