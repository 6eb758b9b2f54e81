use crate::error::{CoreError, Result};
use crate::model::chunk_cache::ChunkCacheOptions;
use crate::model::encoding::Encoding;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoreConfig {
    /// Windowed search and replace limits
    #[serde(default)]
    pub search: SearchConfig,

    /// Behaviour for files opened through a memory map
    #[serde(default)]
    pub large_file: LargeFileConfig,

    /// Incremental re-lexing
    #[serde(default)]
    pub lexing: LexingConfig,
}

/// Search engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchConfig {
    /// Characters scanned per window.
    /// Bounds the memory a single scan step copies out of the document.
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,

    /// Minimum overlap between consecutive windows; the effective overlap is
    /// `max(pattern length, min_overlap)`
    #[serde(default = "default_min_overlap")]
    pub min_overlap: usize,

    /// Maximum results returned by find-all
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Upper bound on the compiled size of a regex, in bytes
    #[serde(default = "default_regex_size_limit")]
    pub regex_size_limit: usize,

    /// Time budget for scanning one window, in milliseconds; 0 disables it
    #[serde(default = "default_window_timeout_ms")]
    pub window_timeout_ms: u64,
}

fn default_window_chars() -> usize {
    4 * 1024 * 1024
}

fn default_min_overlap() -> usize {
    256
}

fn default_max_results() -> usize {
    10_000
}

fn default_regex_size_limit() -> usize {
    10 * 1024 * 1024
}

fn default_window_timeout_ms() -> u64 {
    2_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            min_overlap: default_min_overlap(),
            max_results: default_max_results(),
            regex_size_limit: default_regex_size_limit(),
            window_timeout_ms: default_window_timeout_ms(),
        }
    }
}

/// Large file threshold in bytes.
/// Files at or above it open read-only through a memory map instead of loading into an
/// editable buffer.
pub const LARGE_FILE_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024; // 50MB

/// Large-file configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LargeFileConfig {
    /// File size threshold in bytes for large-file behaviour
    #[serde(default = "default_large_file_threshold")]
    pub threshold_bytes: u64,

    /// Bytes per cached chunk; must be even for UTF-16 sources
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Decoded chunks kept in memory
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// One line-start checkpoint is kept every this many lines
    #[serde(default = "default_line_sample_interval")]
    pub line_sample_interval: usize,

    /// Convert `\r\n` and lone `\r` to `\n` when decoding chunks
    #[serde(default = "default_true")]
    pub normalize_line_endings: bool,

    /// Encoding of the file's bytes
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_large_file_threshold() -> u64 {
    LARGE_FILE_THRESHOLD_BYTES
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_max_chunks() -> usize {
    64
}

fn default_line_sample_interval() -> usize {
    128
}

fn default_true() -> bool {
    true
}

impl Default for LargeFileConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: default_large_file_threshold(),
            chunk_size: default_chunk_size(),
            max_chunks: default_max_chunks(),
            line_sample_interval: default_line_sample_interval(),
            normalize_line_endings: true,
            encoding: Encoding::default(),
        }
    }
}

impl LargeFileConfig {
    pub fn chunk_options(&self) -> ChunkCacheOptions {
        ChunkCacheOptions {
            chunk_size: self.chunk_size,
            max_chunks: self.max_chunks,
            encoding: self.encoding,
            normalize_line_endings: self.normalize_line_endings,
        }
    }
}

/// Incremental lexing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LexingConfig {
    /// Lines fetched from the buffer per batch while re-lexing
    #[serde(default = "default_batch_lines")]
    pub batch_lines: usize,

    /// How far above an edit to look for a valid cached state before restarting
    /// from the first line
    #[serde(default = "default_lookback_limit")]
    pub lookback_limit: usize,
}

fn default_batch_lines() -> usize {
    256
}

fn default_lookback_limit() -> usize {
    4096
}

impl Default for LexingConfig {
    fn default() -> Self {
        Self {
            batch_lines: default_batch_lines(),
            lookback_limit: default_lookback_limit(),
        }
    }
}

impl CoreConfig {
    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("textcore").join("config.json"))
    }

    /// Load configuration from the default location, falling back to defaults if not found
    pub fn load_or_default() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                match Self::load_from_file(&config_path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load config from {}: {}, using defaults",
                            config_path.display(),
                            e
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Load configuration from a JSON file. Missing fields take their defaults and
    /// unknown fields are ignored.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: CoreConfig =
            serde_json::from_str(&contents).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// JSON Schema describing the config file
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(CoreConfig);
        serde_json::to_value(&schema).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.search.window_chars == 0 {
            return Err(CoreError::Config(
                "search.window_chars must be greater than 0".to_string(),
            ));
        }
        if self.search.max_results == 0 {
            return Err(CoreError::Config(
                "search.max_results must be greater than 0".to_string(),
            ));
        }
        if self.large_file.max_chunks == 0 {
            return Err(CoreError::Config(
                "large_file.max_chunks must be greater than 0".to_string(),
            ));
        }
        let unit = self.large_file.encoding.unit_size();
        if self.large_file.chunk_size == 0 || self.large_file.chunk_size % unit != 0 {
            return Err(CoreError::Config(format!(
                "large_file.chunk_size must be a positive multiple of {unit}"
            )));
        }
        if self.large_file.line_sample_interval == 0 {
            return Err(CoreError::Config(
                "large_file.line_sample_interval must be greater than 0".to_string(),
            ));
        }
        if self.lexing.batch_lines == 0 {
            return Err(CoreError::Config(
                "lexing.batch_lines must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
