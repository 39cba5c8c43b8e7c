//! Command-line interface.
//!
//! `uq` has no subcommands: one invocation streams stdin through one index.
//!
//! # Example Usage
//!
//! ```bash
//! # First occurrences only, remembered across runs
//! cat access.log | uq -t seen.uq
//!
//! # Only lines seen before, keyed on the second tab-separated field
//! uq -t seen.uq -v -f 2 < input.tsv
//!
//! # Report membership without touching the index
//! uq -t seen.uq -r -s < candidates.txt
//!
//! # URL mode with a presort buffer, on the SQLite backend
//! uq -t urls.db --backend sqlite -u -P 512 < urls.txt
//! ```

use crate::config::{
    BackendKind, ConfigFile, DerivationConfig, FieldSelection, LoggingSettings, MetricsSettings,
    PresortConfig, UqConfig, parse_size, size_to_usize,
};
use crate::models::{KeySize, OutputFormat, RunMode};
use crate::observability::LogFormat;
use crate::{Error, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Streaming dedup of line records against a persistent index.
///
/// Reads records from stdin and writes to stdout only those whose key has
/// never been seen, in this or any earlier run over the same index.
#[derive(Debug, Parser)]
#[command(name = "uq", version, about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Location of the persistent index.
    #[arg(short = 't', long = "storage", value_name = "PATH")]
    pub storage: PathBuf,

    /// Discard any existing index and start fresh.
    #[arg(short = 'c', long)]
    pub force_create: bool,

    /// Index backend [default: btree].
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Mix a host fingerprint into the leading key bytes.
    #[arg(short = 'u', long)]
    pub url_mode: bool,

    /// Key width in bytes: 1, 2, 4, 8 or 16 [default: 8 for new indexes].
    #[arg(short = 'k', long, value_name = "BYTES")]
    pub key_size: Option<KeySize>,

    /// Block/page size when creating an index [default: 8k].
    #[arg(short = 'b', long, value_name = "SIZE", value_parser = parse_size_arg)]
    pub block_size: Option<u64>,

    /// Stage records in a sorted buffer of this many entries.
    #[arg(short = 'P', long, value_name = "N", conflicts_with = "check")]
    pub presort: Option<usize>,

    /// Key bytes compared by the presort buffer [default: 8, at most the key width].
    #[arg(long, value_name = "BYTES", requires = "presort")]
    pub presort_prefix: Option<usize>,

    /// Hash only this 1-based field; 0 means the whole record.
    #[arg(short = 'f', long, value_name = "N")]
    pub field: Option<usize>,

    /// Field separator [default: TAB].
    #[arg(short = 'd', long, value_name = "CHAR", value_parser = parse_byte_arg)]
    pub separator: Option<u8>,

    /// Lowercase ASCII letters of the key field before hashing.
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Query the index without modifying it.
    #[arg(short = 'r', long)]
    pub check: bool,

    /// Emit records that were seen before instead of new ones.
    #[arg(short = 'v', long)]
    pub invert: bool,

    /// Print `<line> <0|1>` for every record instead of filtering.
    #[arg(short = 's', long)]
    pub seen_format: bool,

    /// Block cache budget [default: 64m].
    #[arg(short = 'm', long, value_name = "SIZE", value_parser = parse_size_arg)]
    pub cache_size: Option<u64>,

    /// Input read buffer [default: 64k].
    #[arg(short = 'p', long, value_name = "SIZE", value_parser = parse_size_arg)]
    pub prefetch_size: Option<u64>,

    /// Maximum size of the sqlite database [default: 16g].
    #[arg(short = 'l', long, value_name = "SIZE", value_parser = parse_size_arg)]
    pub map_size: Option<u64>,

    /// Records resolved per committed batch [default: 100].
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Record delimiter [default: newline].
    #[arg(long, value_name = "CHAR", value_parser = parse_byte_arg)]
    pub delimiter: Option<u8>,

    /// Do not flush output after every line.
    #[arg(long)]
    pub no_line_buffer: bool,

    /// Log progress and lifecycle events.
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Log format.
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,

    /// Configuration file [default: $UQ_CONFIG_PATH, then the platform config dir].
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print version.
    #[arg(long, action = clap::ArgAction::Version)]
    pub version: Option<bool>,
}

impl Cli {
    /// Builds the run configuration: defaults, then `file`, then flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values that do not fit their
    /// setting. Combinations are checked later by [`UqConfig::validate`].
    pub fn into_config(self, file: ConfigFile) -> Result<UqConfig> {
        let mut config = UqConfig::for_path(self.storage);
        file.apply(&mut config)?;

        let storage = &mut config.storage;
        storage.force_create = self.force_create;
        if let Some(backend) = self.backend {
            storage.backend = backend;
        }
        storage.key_size = self.key_size;
        if let Some(block_size) = self.block_size {
            storage.block_size = Some(u32::try_from(block_size).map_err(|_| {
                Error::InvalidInput(format!("block size {block_size} is too large"))
            })?);
        }
        if let Some(cache_size) = self.cache_size {
            storage.cache_size = size_to_usize(cache_size, "cache size")?;
        }
        if let Some(map_size) = self.map_size {
            storage.map_size = map_size;
        }

        let separator = self
            .separator
            .unwrap_or(crate::config::DEFAULT_FIELD_SEPARATOR);
        config.derivation = DerivationConfig {
            url_mode: self.url_mode,
            field: self
                .field
                .filter(|&index| index > 0)
                .map(|index| FieldSelection { index, separator }),
            case_fold: self.ignore_case,
        };

        let pipeline = &mut config.pipeline;
        pipeline.mode = if self.check {
            RunMode::Check
        } else {
            RunMode::Dedup
        };
        pipeline.invert = self.invert;
        pipeline.output = if self.seen_format {
            OutputFormat::Seen
        } else {
            OutputFormat::Passthrough
        };
        pipeline.presort = self.presort.map(|capacity| PresortConfig {
            capacity,
            prefix_width: self.presort_prefix,
        });
        if let Some(batch_size) = self.batch_size {
            pipeline.batch_size = batch_size;
        }
        if let Some(delimiter) = self.delimiter {
            pipeline.delimiter = delimiter;
        }
        if let Some(prefetch) = self.prefetch_size {
            pipeline.prefetch_size = size_to_usize(prefetch, "prefetch size")?;
        }
        if self.no_line_buffer {
            pipeline.line_buffered = false;
        }

        if self.log_format.is_some() || self.log_file.is_some() {
            let logging = config
                .observability
                .logging
                .get_or_insert_with(LoggingSettings::default);
            if let Some(format) = self.log_format {
                logging.format = Some(format.to_string());
            }
            if let Some(file) = self.log_file {
                logging.file = Some(file);
            }
        }
        if let Some(listen) = self.metrics_listen {
            config.observability.metrics = Some(MetricsSettings {
                listen: Some(listen),
            });
        }
        config.verbose = self.verbose;

        Ok(config)
    }
}

fn parse_size_arg(value: &str) -> std::result::Result<u64, String> {
    parse_size(value).map_err(|e| e.to_string())
}

/// Parses a single-byte option: one ASCII character or `\t`, `\n`, `\0`, `\\`.
fn parse_byte_arg(value: &str) -> std::result::Result<u8, String> {
    match value {
        "\\t" => Ok(b'\t'),
        "\\n" => Ok(b'\n'),
        "\\0" => Ok(0),
        "\\\\" => Ok(b'\\'),
        _ => match value.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(format!("expected a single byte, got '{value}'")),
        },
    }
}
