//! Run mode and output format.

/// How each record is resolved against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Insert-if-absent; the index grows (default).
    #[default]
    Dedup,
    /// Read-only membership test; the index is never mutated.
    Check,
}

impl RunMode {
    /// Returns the mode as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dedup => "dedup",
            Self::Check => "check",
        }
    }

    /// Returns true when the index is opened read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Self::Check)
    }
}

/// How resolved records are written to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Emitted records are written unchanged (default).
    #[default]
    Passthrough,
    /// Every resolved record produces `<line-number> <0|1>`; nothing is suppressed.
    Seen,
}

impl OutputFormat {
    /// Returns the format as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Seen => "seen",
        }
    }
}
