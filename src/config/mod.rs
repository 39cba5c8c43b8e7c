//! Configuration management.
//!
//! A run is described by one immutable [`UqConfig`], built once at startup
//! from defaults, an optional TOML file and command-line flags (in increasing
//! precedence). Each component receives the section it needs by reference.

mod size;

pub use size::{SizeValue, parse_size, size_to_usize};

use crate::models::{KeySize, OutputFormat, RunMode};
use crate::storage::btree::node_capacity;
use crate::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default B-tree block / `SQLite` page size.
pub const DEFAULT_BLOCK_SIZE: u32 = 8 * 1024;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: u32 = 64;

/// Default number of resolved records per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default presort buffer capacity.
pub const DEFAULT_PRESORT_CAPACITY: usize = 256;

/// Default presort duplicate-check prefix width, clamped to the key width.
pub const DEFAULT_PRESORT_PREFIX: usize = 8;

/// Default input read buffer.
pub const DEFAULT_PREFETCH_SIZE: usize = 64 * 1024;

/// Default block cache budget.
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024 * 1024;

/// Default maximum map size of the transactional backend (16 GiB).
pub const DEFAULT_MAP_SIZE: u64 = 16 * 1024 * 1024 * 1024;

/// Default field separator.
pub const DEFAULT_FIELD_SEPARATOR: u8 = b'\t';

/// Environment variable naming a config file.
pub const CONFIG_PATH_ENV: &str = "UQ_CONFIG_PATH";

/// Persistent index backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Custom block-organized B-tree file (default).
    #[default]
    Btree,
    /// Embedded `SQLite` database.
    Sqlite,
}

impl BackendKind {
    /// Returns the backend name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Btree => "btree",
            Self::Sqlite => "sqlite",
        }
    }
}

/// How an index is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Initialize a fresh index, discarding anything at the path.
    Create,
    /// Load an existing index for reading and writing.
    Load,
    /// Load an existing index for membership queries only.
    ReadOnly,
}

/// Persistent index location and backend parameters.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Location of the index file.
    pub path: PathBuf,
    /// Which backend stores the index.
    pub backend: BackendKind,
    /// Discard any existing index and start fresh.
    pub force_create: bool,
    /// Requested key width; `None` adopts the stored width (or the default).
    pub key_size: Option<KeySize>,
    /// Requested block/page size; `None` adopts the stored size (or the default).
    pub block_size: Option<u32>,
    /// Block/page size for new indexes when none is requested. Never checked
    /// against an existing index.
    pub default_block_size: u32,
    /// Block cache budget in bytes.
    pub cache_size: usize,
    /// Maximum database size for the transactional backend.
    pub map_size: u64,
}

impl StorageConfig {
    /// Creates a storage config for `path` with default parameters.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: BackendKind::default(),
            force_create: false,
            key_size: None,
            block_size: None,
            default_block_size: DEFAULT_BLOCK_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            map_size: DEFAULT_MAP_SIZE,
        }
    }

    /// Sets the backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets an explicit key width.
    #[must_use]
    pub const fn with_key_size(mut self, key_size: KeySize) -> Self {
        self.key_size = Some(key_size);
        self
    }

    /// Key width used when a new index is created.
    #[must_use]
    pub fn creation_key_size(&self) -> KeySize {
        self.key_size.unwrap_or_default()
    }

    /// Block size used when a new index is created.
    #[must_use]
    pub fn creation_block_size(&self) -> u32 {
        self.block_size.unwrap_or(self.default_block_size)
    }
}

/// Selection of one delimited field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSelection {
    /// 1-based field number.
    pub index: usize,
    /// Separator byte between fields.
    pub separator: u8,
}

/// How a record is turned into a fingerprint.
#[derive(Debug, Clone, Default)]
pub struct DerivationConfig {
    /// Mix a host fingerprint into the leading bytes.
    pub url_mode: bool,
    /// Hash only this field of each record.
    pub field: Option<FieldSelection>,
    /// ASCII-lowercase the key field before hashing.
    pub case_fold: bool,
}

/// Presort buffer sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresortConfig {
    /// Maximum staged records.
    pub capacity: usize,
    /// Bytes of the key compared for in-buffer duplicates; `None` means
    /// [`DEFAULT_PRESORT_PREFIX`]. Always clamped to the index key width.
    pub prefix_width: Option<usize>,
}

impl PresortConfig {
    /// Prefix width actually compared for an index of `key_width` bytes.
    #[must_use]
    pub fn effective_prefix(&self, key_width: usize) -> usize {
        self.prefix_width
            .unwrap_or(DEFAULT_PRESORT_PREFIX)
            .min(key_width)
    }
}

/// Record flow: reading, resolution and emission.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Insert-if-absent or read-only check.
    pub mode: RunMode,
    /// Emit duplicates instead of first occurrences.
    pub invert: bool,
    /// Output format.
    pub output: OutputFormat,
    /// Presort buffer, if enabled.
    pub presort: Option<PresortConfig>,
    /// Resolved records per committed batch.
    pub batch_size: usize,
    /// Record delimiter.
    pub delimiter: u8,
    /// Input read buffer size.
    pub prefetch_size: usize,
    /// Flush output after every emitted line.
    pub line_buffered: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Dedup,
            invert: false,
            output: OutputFormat::Passthrough,
            presort: None,
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: b'\n',
            prefetch_size: DEFAULT_PREFETCH_SIZE,
            line_buffered: true,
        }
    }
}

/// Logging and metrics settings (file section, merged with CLI flags).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Logging section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Default filter directive, e.g. `info` or `uq=debug`.
    pub level: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Metrics section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Address of the Prometheus scrape listener.
    pub listen: Option<SocketAddr>,
}

/// Main configuration for uq.
#[derive(Debug, Clone)]
pub struct UqConfig {
    /// Index location and backend parameters.
    pub storage: StorageConfig,
    /// Fingerprint derivation.
    pub derivation: DerivationConfig,
    /// Record flow.
    pub pipeline: PipelineConfig,
    /// Logging and metrics.
    pub observability: ObservabilitySettings,
    /// Periodic throughput reporting and info-level logs.
    pub verbose: bool,
}

impl UqConfig {
    /// Creates a default configuration over the index at `path`.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::new(path),
            derivation: DerivationConfig::default(),
            pipeline: PipelineConfig::default(),
            observability: ObservabilitySettings::default(),
            verbose: false,
        }
    }

    /// Checks option values and combinations.
    ///
    /// Runs before any I/O against the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.storage.path.as_os_str().is_empty() {
            return Err(Error::InvalidInput(
                "storage path is required".to_string(),
            ));
        }

        self.validate_block_size(self.storage.creation_block_size())?;

        if let Some(field) = self.derivation.field {
            if field.index == 0 {
                return Err(Error::InvalidInput(
                    "field index is 1-based; omit it to hash whole records".to_string(),
                ));
            }
        }

        let pipeline = &self.pipeline;
        if let Some(presort) = pipeline.presort {
            if pipeline.mode.is_read_only() {
                return Err(Error::InvalidInput(
                    "presort cannot be combined with check mode".to_string(),
                ));
            }
            if presort.capacity == 0 {
                return Err(Error::InvalidInput(
                    "presort buffer size must be positive".to_string(),
                ));
            }
            if let Some(width) = presort.prefix_width {
                if !(1..=16).contains(&width) {
                    return Err(Error::InvalidInput(format!(
                        "presort prefix width must be in 1..=16, got {width}"
                    )));
                }
            }
        }
        if pipeline.batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch size must be positive".to_string(),
            ));
        }
        if pipeline.prefetch_size == 0 {
            return Err(Error::InvalidInput(
                "prefetch size must be positive".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_block_size(&self, block_size: u32) -> Result<()> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(Error::InvalidInput(format!(
                "block size must be >= {MIN_BLOCK_SIZE}, got {block_size}"
            )));
        }
        match self.storage.backend {
            BackendKind::Btree => {
                let width = self.storage.creation_key_size().bytes();
                let (_, interior) = node_capacity(block_size as usize, width);
                if interior < 3 {
                    return Err(Error::InvalidInput(format!(
                        "block size {block_size} is too small for {width}-byte keys"
                    )));
                }
            },
            BackendKind::Sqlite => {
                if !block_size.is_power_of_two() || !(512..=65_536).contains(&block_size) {
                    return Err(Error::InvalidInput(format!(
                        "sqlite page size must be a power of two in 512..=65536, got {block_size}"
                    )));
                }
            },
        }
        Ok(())
    }

    /// Decides how the index is opened.
    ///
    /// Check mode always opens read-only; otherwise `force_create` or a
    /// missing path creates a new index and an existing path is loaded.
    #[must_use]
    pub fn open_mode(&self) -> OpenMode {
        if self.pipeline.mode.is_read_only() {
            OpenMode::ReadOnly
        } else if self.storage.force_create || !self.storage.path.exists() {
            OpenMode::Create
        } else {
            OpenMode::Load
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Storage section.
    pub storage: Option<ConfigFileStorage>,
    /// Pipeline section.
    pub pipeline: Option<ConfigFilePipeline>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// Metrics section.
    pub metrics: Option<MetricsSettings>,
}

/// Storage section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// Backend name.
    pub backend: Option<BackendKind>,
    /// Block/page size at creation.
    pub block_size: Option<SizeValue>,
    /// Block cache budget.
    pub cache_size: Option<SizeValue>,
    /// Transactional backend map size.
    pub map_size: Option<SizeValue>,
}

/// Pipeline section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePipeline {
    /// Records per batch.
    pub batch_size: Option<usize>,
    /// Input read buffer.
    pub prefetch_size: Option<SizeValue>,
    /// Flush output after every emitted line.
    pub line_buffered: Option<bool>,
}

impl ConfigFile {
    /// Loads a config file from a path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })
    }

    /// Resolves and loads the config file.
    ///
    /// Checks, in order: the explicit path, `UQ_CONFIG_PATH`, then
    /// `<platform config dir>/uq/config.toml`. Returns an empty config when
    /// none of them names an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be loaded.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Self::load_from_file(Path::new(&path));
            }
        }

        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Ok(Self::default());
        };
        let platform_config = base_dirs.config_dir().join("uq").join("config.toml");
        if platform_config.exists() {
            return Self::load_from_file(&platform_config);
        }

        Ok(Self::default())
    }

    /// Applies the file's values on top of `config`.
    ///
    /// A block size from the file only shapes new indexes; an existing index
    /// keeps its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a size value does not parse.
    pub fn apply(self, config: &mut UqConfig) -> Result<()> {
        if let Some(storage) = self.storage {
            if let Some(backend) = storage.backend {
                config.storage.backend = backend;
            }
            if let Some(block_size) = storage.block_size {
                let bytes = block_size.bytes()?;
                config.storage.default_block_size = u32::try_from(bytes).map_err(|_| {
                    Error::InvalidInput(format!("block size {bytes} is too large"))
                })?;
            }
            if let Some(cache_size) = storage.cache_size {
                config.storage.cache_size = size_to_usize(cache_size.bytes()?, "cache size")?;
            }
            if let Some(map_size) = storage.map_size {
                config.storage.map_size = map_size.bytes()?;
            }
        }
        if let Some(pipeline) = self.pipeline {
            if let Some(batch_size) = pipeline.batch_size {
                config.pipeline.batch_size = batch_size;
            }
            if let Some(prefetch) = pipeline.prefetch_size {
                config.pipeline.prefetch_size = size_to_usize(prefetch.bytes()?, "prefetch size")?;
            }
            if let Some(line_buffered) = pipeline.line_buffered {
                config.pipeline.line_buffered = line_buffered;
            }
        }
        if self.logging.is_some() {
            config.observability.logging = self.logging;
        }
        if self.metrics.is_some() {
            config.observability.metrics = self.metrics;
        }
        Ok(())
    }
}
