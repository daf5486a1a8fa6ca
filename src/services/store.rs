use crate::utils::validation::sanitize_filename;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use uuid::Uuid;

/// Name used in keys when the caller has no usable filename
const ANONYMOUS_NAME: &str = "blob";

/// Attempts at finding a free key before giving up
const MAX_KEY_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Staged file not found: {0}")]
    NotFound(String),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file living in the ephemeral store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub key: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Flat staging directory shared by every request and the reaper.
///
/// Safe to share across tasks without extra locking: every write goes to a
/// freshly generated key opened with create-new semantics, so concurrent
/// writers can never clobber each other and the reaper only ever deletes.
#[derive(Debug)]
pub struct EphemeralStore {
    root: PathBuf,
}

impl EphemeralStore {
    /// Open (and create if needed) the staging directory.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a key from the current time, a random UUID and the caller's filename.
    pub fn generate_key(original_name: Option<&str>) -> String {
        let name = original_name
            .and_then(sanitize_filename)
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
        format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple(),
            name
        )
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key == "."
            || key == ".."
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    async fn create_unique(
        &self,
        original_name: Option<&str>,
    ) -> Result<(String, PathBuf, File), StoreError> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = Self::generate_key(original_name);
            let path = self.path_for(&key)?;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((key, path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!("Store key collision on {}, regenerating", key);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique store key",
        )))
    }

    /// Persist `data` under a fresh key.
    pub async fn put(
        &self,
        original_name: Option<&str>,
        data: &[u8],
    ) -> Result<StagedFile, StoreError> {
        let (key, path, mut file) = self.create_unique(original_name).await?;

        let written = async {
            file.write_all(data).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(e.into());
        }

        tracing::debug!("Staged {} ({} bytes)", key, data.len());
        Ok(StagedFile {
            key,
            path,
            created_at: Utc::now(),
            size: data.len() as u64,
        })
    }

    /// Persist an incrementally produced stream under a fresh key.
    ///
    /// The stream is copied through a fixed-size buffer and never held in
    /// memory as a whole. A failed copy removes the partial file.
    pub async fn put_stream<R>(
        &self,
        original_name: Option<&str>,
        mut reader: R,
    ) -> Result<StagedFile, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (key, path, file) = self.create_unique(original_name).await?;
        let mut writer = BufWriter::new(file);

        let copied = async {
            let n = tokio::io::copy(&mut reader, &mut writer).await?;
            writer.flush().await?;
            Ok::<u64, std::io::Error>(n)
        }
        .await;

        match copied {
            Ok(size) => {
                tracing::debug!("Staged stream {} ({} bytes)", key, size);
                Ok(StagedFile {
                    key,
                    path,
                    created_at: Utc::now(),
                    size,
                })
            }
            Err(e) => {
                drop(writer);
                let _ = fs::remove_file(&path).await;
                Err(e.into())
            }
        }
    }

    pub async fn open(&self, key: &str) -> Result<File, StoreError> {
        let path = self.path_for(key)?;
        File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => StoreError::Io(e),
        })
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => StoreError::Io(e),
        })
    }

    pub async fn contains(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Delete one entry. Returns whether a file was actually removed;
    /// a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete used on cleanup paths.
    pub async fn discard(&self, key: &str) {
        if let Err(e) = self.delete(key).await {
            tracing::warn!("Failed to discard staged file {}: {}", key, e);
        }
    }

    /// Keys currently present in the store, in no particular order.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return keys;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }
        keys
    }

    /// Delete every regular file whose last modification is older than `ttl`.
    ///
    /// Never fails: entries that disappear mid-scan or cannot be removed are
    /// skipped and counted in the report.
    pub async fn sweep(&self, ttl: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Sweep could not list {}: {}", self.root.display(), e);
                return report;
            }
        };

        let now = SystemTime::now();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Sweep aborted listing {}: {}", self.root.display(), e);
                    break;
                }
            };
            report.scanned += 1;

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Removed by someone else between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(_) => {
                    report.failed += 1;
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age <= ttl {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!("Sweep failed to remove {:?}: {}", entry.path(), e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
