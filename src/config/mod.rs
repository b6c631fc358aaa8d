//! Service configuration.
//!
//! Loaded from a TOML file with defaults for everything; the storage base
//! path can be overridden through the `SYS_BASE_PATH` environment
//! variable, which anchors every storage backend.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable anchoring the storage `base_path`.
pub const SYS_BASE_PATH_ENV: &str = "SYS_BASE_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub streaming: StreamingConfig,
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "vodvault.sqlite".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base path every storage operation is confined under.
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("assets"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Per-user byte quota across all stored chunks.
    pub user_quota_bytes: u64,
    /// Write-buffer size for streaming chunk bodies to storage.
    pub write_buf_bytes: usize,
    /// Parse-step size fed to the multipart parser per round.
    pub parse_step_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            user_quota_bytes: 256 * 1024 * 1024,
            write_buf_bytes: 4096,
            parse_step_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Query-parameter label carrying the encoded document id.
    pub doc_id_label: String,
    /// Query-parameter label carrying the element detail.
    pub detail_label: String,
    /// `max-age` seconds for publicly visible resources.
    pub cache_max_age_secs: u64,
    /// Read-buffer size for storage reads on the stream path.
    pub read_buf_bytes: usize,
    /// Write-buffer size bounding each rewritten playlist chunk.
    pub playlist_out_buf_bytes: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            doc_id_label: "doc_id".into(),
            detail_label: "detail".into(),
            cache_max_age_secs: 300,
            read_buf_bytes: 512,
            playlist_out_buf_bytes: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Target size of one media segment on disk.
    pub segment_bytes: u64,
    /// Bytes captured into the fMP4 init map.
    pub init_map_bytes: usize,
    /// Nominal duration credited to a full segment in the playlist.
    pub nominal_segment_secs: f64,
    /// Read-buffer size for source chunk reads.
    pub read_buf_bytes: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            segment_bytes: 1024 * 1024,
            init_map_bytes: 256,
            nominal_segment_secs: 6.0,
            read_buf_bytes: 8192,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            streaming: StreamingConfig::default(),
            transcode: TranscodeConfig::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Candidate locations tried in order when no explicit path is given:
    /// the working directory, the user config directory, then the
    /// system-wide file.
    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("vodvault.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            if !home.is_empty() {
                paths.push(PathBuf::from(home).join(".config/vodvault/config.toml"));
            }
        }
        paths.push(PathBuf::from("/etc/vodvault/config.toml"));
        paths
    }

    fn read_toml_file(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&contents) {
            Ok(config) => {
                tracing::debug!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse {}: {e}; ignoring", path.display());
                None
            }
        }
    }

    /// Load from the given file, or scan the conventional locations when
    /// none is given; fall back to defaults when nothing parses.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(p) => Self::read_toml_file(p),
            None => Self::default_paths()
                .iter()
                .find_map(|p| Self::read_toml_file(p)),
        }
        .unwrap_or_default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(base) = std::env::var(SYS_BASE_PATH_ENV) {
            if !base.is_empty() {
                self.storage.base_path = PathBuf::from(base);
            }
        }
    }

    /// Sanity-check the configuration, returning human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.upload.write_buf_bytes < 512 {
            warnings.push("upload.write_buf_bytes below 512 will thrash storage writes".into());
        }
        if self.transcode.segment_bytes < 4096 {
            warnings.push("transcode.segment_bytes below 4096 produces degenerate segments".into());
        }
        if self.streaming.playlist_out_buf_bytes < 256 {
            warnings.push(
                "streaming.playlist_out_buf_bytes below 256 cannot hold a playlist header".into(),
            );
        }
        if self.streaming.doc_id_label == self.streaming.detail_label {
            warnings.push("streaming query-parameter labels must differ".into());
        }
        warnings
    }
}
