//! Profile configuration.
//!
//! Profiles live outside the vault root, under a per-user configuration
//! directory: one TOML file per profile plus an `active_profile` pointer
//! file naming which one to load by default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_storage_type() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type", default = "default_storage_type")]
    pub kind: String,
    pub path: Option<PathBuf>,
    pub s3: S3Config,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            kind: default_storage_type(),
            path: None,
            s3: S3Config::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub max_size_mb: u64,
    pub ttl_minutes: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        MemoryCacheConfig {
            enabled: true,
            max_size_mb: 100,
            ttl_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskCacheConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub max_size_mb: u64,
    pub ttl_hours: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        DiskCacheConfig {
            // on by default only for S3, resolved by `CacheConfig::disk_enabled`
            enabled: false,
            path: None,
            max_size_mb: 1024,
            ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory: MemoryCacheConfig,
    pub disk: DiskCacheConfig,
}

impl CacheConfig {
    /// Disk caching defaults on for S3 and off for local storage; an
    /// explicit `disk.enabled` in the profile always wins.
    pub fn disk_enabled(&self, storage_kind: &str) -> bool {
        self.disk.enabled || storage_kind == "s3"
    }
}

fn default_notes_dir() -> String {
    "notes".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    #[serde(default = "default_notes_dir")]
    pub notes_dir: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            notes_dir: default_notes_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    pub endpoint: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            model: "nomic-embed-text".to_string(),
            dimensions: 384,
            endpoint: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSearchConfig {
    pub text_weight: f64,
    pub vector_weight: f64,
    pub min_score: f64,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        VectorSearchConfig {
            text_weight: 0.7,
            vector_weight: 0.3,
            min_score: 0.7,
            default_limit: 10,
            max_limit: 100,
        }
    }
}

fn default_indexing_batch_size() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    #[serde(default = "default_indexing_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        IndexingConfig {
            batch_size: default_indexing_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: bool,
    pub embedding: EmbeddingConfig,
    pub search: VectorSearchConfig,
    pub indexing: IndexingConfig,
}

/// A single named profile: storage, cache, vault, and vector settings.
/// Everything the core consumes; CLI-only concerns (output format, color)
/// are deliberately left out of this schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub vault: VaultConfig,
    pub vector: VectorConfig,
}

impl Profile {
    /// Loads a named profile from `config_dir/<name>.toml`. Environment
    /// variables `KBVAULT_S3_ACCESS_KEY_ID` / `KBVAULT_S3_SECRET_ACCESS_KEY`
    /// override file-provided S3 credentials.
    pub fn load(config_dir: &Path, name: &str) -> anyhow::Result<Self> {
        let path = config_dir.join(format!("{name}.toml"));
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read profile {}: {}", path.display(), e))?;
        let mut profile: Profile = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse profile {}: {}", path.display(), e))?;
        profile.apply_env_overrides();
        tracing::debug!(profile = name, storage = %profile.storage.kind, vector_enabled = profile.vector.enabled, "loaded profile");
        Ok(profile)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("KBVAULT_S3_ACCESS_KEY_ID") {
            self.storage.s3.access_key_id = key;
        }
        if let Ok(secret) = std::env::var("KBVAULT_S3_SECRET_ACCESS_KEY") {
            self.storage.s3.secret_access_key = secret;
        }
    }

    pub fn notes_path(&self, vault_root: &Path) -> PathBuf {
        vault_root.join(&self.vault.notes_dir)
    }
}

/// Per-user configuration directory: `~/.config/kbvault` (or the platform
/// equivalent via `dirs::config_dir`).
pub fn config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("kbvault"))
        .ok_or_else(|| anyhow::anyhow!("could not determine a configuration directory for this platform"))
}

fn active_profile_pointer_path(config_dir: &Path) -> PathBuf {
    config_dir.join("active_profile")
}

/// Reads the `active_profile` pointer file; `None` if unset (caller falls
/// back to a hardcoded "default" profile name).
pub fn active_profile_name(config_dir: &Path) -> Option<String> {
    std::fs::read_to_string(active_profile_pointer_path(config_dir))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn set_active_profile_name(config_dir: &Path, name: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(config_dir)?;
    std::fs::write(active_profile_pointer_path(config_dir), name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn load_missing_profile_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Profile::load(dir.path(), "default").is_err());
    }

    #[test]
    fn load_parses_nested_sections() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[storage]
type = "s3"
path = "/vault"

[storage.s3]
bucket = "notes-bucket"
region = "us-west-2"

[vector]
enabled = true

[vector.search]
text_weight = 0.6
vector_weight = 0.4
"#,
        )
        .unwrap();
        let profile = Profile::load(dir.path(), "default").unwrap();
        assert_eq!(profile.storage.kind, "s3");
        assert_eq!(profile.storage.s3.bucket, "notes-bucket");
        assert!(profile.vector.enabled);
        assert_eq!(profile.vector.search.text_weight, 0.6);
    }

    #[test]
    fn defaults_apply_when_sections_are_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.toml"), "").unwrap();
        let profile = Profile::load(dir.path(), "default").unwrap();
        assert_eq!(profile.storage.kind, "local");
        assert_eq!(profile.vault.notes_dir, "notes");
        assert_eq!(profile.cache.memory.max_size_mb, 100);
        assert!(!profile.vector.enabled);
    }

    #[test]
    fn disk_cache_defaults_on_for_s3_even_when_unset() {
        let cache = CacheConfig::default();
        assert!(cache.disk_enabled("s3"));
        assert!(!cache.disk_enabled("local"));
    }

    #[test]
    #[serial]
    fn env_overrides_take_precedence_over_file_credentials() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[storage.s3]\naccess_key_id = \"file-key\"\n",
        )
        .unwrap();
        unsafe {
            std::env::set_var("KBVAULT_S3_ACCESS_KEY_ID", "env-key");
        }
        let profile = Profile::load(dir.path(), "default").unwrap();
        unsafe {
            std::env::remove_var("KBVAULT_S3_ACCESS_KEY_ID");
        }
        assert_eq!(profile.storage.s3.access_key_id, "env-key");
    }

    #[test]
    fn active_profile_pointer_round_trips() {
        let dir = TempDir::new().unwrap();
        assert!(active_profile_name(dir.path()).is_none());
        set_active_profile_name(dir.path(), "work").unwrap();
        assert_eq!(active_profile_name(dir.path()), Some("work".to_string()));
    }
}
