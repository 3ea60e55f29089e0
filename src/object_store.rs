//! Object store gateway
//!
//! Bucket-scoped blob storage addressed by relative paths. `FsObjectStore`
//! keeps one directory per bucket under a root directory and hands out
//! public references of the form
//! `{base}/storage/v1/object/public/{bucket}/{path}`.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ObjectStoreError;

const PUBLIC_PREFIX: [&str; 4] = ["storage", "v1", "object", "public"];

/// Behaviour when an object already exists at the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with `AlreadyExists`; keeps earlier versions intact
    CreateNew,
    Overwrite,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes and return the object's public reference
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        mode: PutMode,
    ) -> Result<String, ObjectStoreError>;

    /// Deterministic reference for a path
    fn public_reference(&self, bucket: &str, path: &str) -> String;

    /// Delete by path or public reference; missing objects are not an error
    async fn delete(&self, bucket: &str, path_or_reference: &str) -> Result<(), ObjectStoreError>;
}

/// Run an object store call under a deadline
pub async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<T, ObjectStoreError>
where
    F: Future<Output = Result<T, ObjectStoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ObjectStoreError::Timeout(format!(
            "{} exceeded {}ms",
            operation,
            timeout.as_millis()
        ))),
    }
}

/// Filesystem-backed object store
pub struct FsObjectStore {
    root_dir: PathBuf,
    base_url: Url,
}

impl FsObjectStore {
    /// Create a store rooted at `root_dir`, publishing references under `base_url`
    pub async fn new<P: AsRef<Path>>(root_dir: P, base_url: &str) -> Result<Self, ObjectStoreError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        let base_url = Url::parse(base_url)
            .map_err(|e| ObjectStoreError::InvalidPath(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ObjectStoreError::InvalidPath(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), base_url = %base_url, "Initialized object store");

        Ok(Self { root_dir, base_url })
    }

    /// Resolve a bucket-relative path, rejecting anything that escapes the bucket
    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, ObjectStoreError> {
        let invalid = || ObjectStoreError::InvalidPath(format!("{}/{}", bucket, path));

        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(invalid());
        }
        let relative = Path::new(path);
        if path.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(invalid());
        }

        Ok(self.root_dir.join(bucket).join(relative))
    }

    /// Turn a public reference back into a bucket-relative path
    ///
    /// Plain paths are returned unchanged.
    pub fn path_from_reference(&self, bucket: &str, reference: &str) -> Result<String, ObjectStoreError> {
        if !(reference.starts_with("http://") || reference.starts_with("https://")) {
            return Ok(reference.to_string());
        }

        let invalid = || ObjectStoreError::InvalidPath(reference.to_string());
        let url = Url::parse(reference)
            .map_err(|e| ObjectStoreError::InvalidPath(format!("{}: {}", reference, e)))?;
        let segments: Vec<&str> = url.path_segments().ok_or_else(invalid)?.collect();

        // Segments are percent-encoded by `public_reference`
        let start = segments
            .windows(PUBLIC_PREFIX.len() + 1)
            .position(|w| w[..PUBLIC_PREFIX.len()] == PUBLIC_PREFIX && w[PUBLIC_PREFIX.len()] == bucket)
            .map(|i| i + PUBLIC_PREFIX.len() + 1)
            .ok_or_else(invalid)?;

        let decoded = segments[start..]
            .iter()
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ObjectStoreError::InvalidPath(format!("{}: {}", reference, e)))?;

        if decoded.is_empty() || decoded.iter().all(|s| s.is_empty()) {
            return Err(invalid());
        }
        Ok(decoded.join("/"))
    }

    /// Read an object's bytes
    pub async fn get(&self, bucket: &str, path_or_reference: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_from_reference(bucket, path_or_reference)?;
        Ok(fs::read(self.object_path(bucket, &path)?).await?)
    }

    /// Check if an object exists
    pub async fn exists(&self, bucket: &str, path_or_reference: &str) -> bool {
        match self
            .path_from_reference(bucket, path_or_reference)
            .and_then(|path| self.object_path(bucket, &path))
        {
            Ok(full) => fs::metadata(full).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn write_new(&self, full: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(full)
            .await?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        if written.is_err() {
            fs::remove_file(full).await.ok();
        }
        written
    }

    async fn write_replace(&self, full: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let tmp = full.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, full).await {
            fs::remove_file(&tmp).await.ok();
            return Err(e);
        }
        Ok(())
    }

    /// Count stored objects and bytes per bucket
    pub async fn stats(&self) -> Result<ObjectStoreStats, ObjectStoreError> {
        let mut stats = ObjectStoreStats::default();
        let mut pending = vec![self.root_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    stats.total_objects += 1;
                    stats.total_bytes += metadata.len();
                }
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        mode: PutMode,
    ) -> Result<String, ObjectStoreError> {
        let full = self.object_path(bucket, path)?;
        let upload_err = |e: std::io::Error| ObjectStoreError::Upload {
            bucket: bucket.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(upload_err)?;
        }

        let result = match mode {
            PutMode::CreateNew => self.write_new(&full, bytes).await,
            PutMode::Overwrite => self.write_replace(&full, bytes).await,
        };

        match result {
            Ok(()) => {
                debug!(bucket, path, content_type, size = bytes.len(), ?mode, "Stored object");
                Ok(self.public_reference(bucket, path))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ObjectStoreError::AlreadyExists {
                    bucket: bucket.to_string(),
                    path: path.to_string(),
                })
            }
            Err(e) => Err(upload_err(e)),
        }
    }

    fn public_reference(&self, bucket: &str, path: &str) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(PUBLIC_PREFIX)
                .push(bucket)
                .extend(path.split('/'));
        }
        url.to_string()
    }

    async fn delete(&self, bucket: &str, path_or_reference: &str) -> Result<(), ObjectStoreError> {
        let path = self.path_from_reference(bucket, path_or_reference)?;
        let full = self.object_path(bucket, &path)?;

        match fs::remove_file(&full).await {
            Ok(()) => {
                info!(bucket, path = %path, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(bucket, path = %path, "Object already absent");
                Ok(())
            }
            Err(e) => Err(ObjectStoreError::Delete {
                bucket: bucket.to_string(),
                path,
                reason: e.to_string(),
            }),
        }
    }
}

/// Object store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectStoreStats {
    pub total_objects: u64,
    pub total_bytes: u64,
}
