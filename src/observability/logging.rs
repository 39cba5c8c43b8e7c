//! Structured logging configuration.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default filter directive.
pub const DEFAULT_LEVEL: &str = "warn";

/// Filter directive used with `--verbose`.
pub const VERBOSE_LEVEL: &str = "info";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}', expected pretty or json"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub directive: String,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from file/CLI settings.
    ///
    /// An explicit level wins; otherwise `verbose` selects `info` over the
    /// default `warn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown format name.
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Result<Self> {
        let format = settings
            .and_then(|s| s.format.as_deref())
            .map(LogFormat::from_str)
            .transpose()?
            .unwrap_or_default();
        let directive = settings
            .and_then(|s| s.level.clone())
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| {
                if verbose { VERBOSE_LEVEL } else { DEFAULT_LEVEL }.to_string()
            });

        Ok(Self {
            format,
            directive,
            file: settings.and_then(|s| s.file.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_settings(None, false).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.directive, "warn");
        assert!(config.file.is_none());

        let verbose = LoggingConfig::from_settings(None, true).unwrap();
        assert_eq!(verbose.directive, "info");
    }

    #[test]
    fn test_explicit_settings_win() {
        let settings = LoggingSettings {
            format: Some("JSON".to_string()),
            level: Some("uq=debug".to_string()),
            file: Some(PathBuf::from("/tmp/uq.log")),
        };
        let config = LoggingConfig::from_settings(Some(&settings), true).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directive, "uq=debug");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/uq.log")));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let settings = LoggingSettings {
            format: Some("xml".to_string()),
            ..LoggingSettings::default()
        };
        assert!(LoggingConfig::from_settings(Some(&settings), false).is_err());
    }
}
