//! Configuration for intake-store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intake-store")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for the record database and object buckets
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Base URL that public object references are built from
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Bucket for record images
    #[serde(default = "default_images_bucket")]
    pub images_bucket: String,

    /// Bucket for summary documents
    #[serde(default = "default_documents_bucket")]
    pub documents_bucket: String,

    /// Per-call timeout for object and record store calls
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Upper bound on images per staged record
    #[serde(default = "default_max_images")]
    pub max_images_per_record: usize,

    /// Maximum size of a single attachment (0 = unlimited)
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

fn default_public_base_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_images_bucket() -> String {
    "images".to_string()
}

fn default_documents_bucket() -> String {
    "documents".to_string()
}

fn default_call_timeout() -> u64 {
    30
}

fn default_max_images() -> usize {
    3
}

fn default_max_attachment_bytes() -> u64 {
    20 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            public_base_url: default_public_base_url(),
            images_bucket: default_images_bucket(),
            documents_bucket: default_documents_bucket(),
            call_timeout_secs: default_call_timeout(),
            max_images_per_record: default_max_images(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Directory holding one subdirectory per bucket
    pub fn objects_dir(&self) -> PathBuf {
        self.storage_dir.join("objects")
    }

    /// Record database path
    pub fn records_db_path(&self) -> PathBuf {
        self.storage_dir.join("records.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("images_bucket = \"photos\"\n").unwrap();
        assert_eq!(config.images_bucket, "photos");
        assert_eq!(config.documents_bucket, "documents");
        assert_eq!(config.max_images_per_record, 3);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config {
            storage_dir: temp_dir.path().to_path_buf(),
            call_timeout_secs: 5,
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.storage_dir, temp_dir.path());
        assert_eq!(loaded.call_timeout_secs, 5);
        assert_eq!(loaded.records_db_path(), temp_dir.path().join("records.db"));
    }
}
