//! Key field selection.

use crate::config::DerivationConfig;
use std::borrow::Cow;

/// Removes one trailing `delimiter` byte, if present.
#[must_use]
pub fn strip_delimiter(record: &[u8], delimiter: u8) -> &[u8] {
    match record.split_last() {
        Some((&last, rest)) if last == delimiter => rest,
        _ => record,
    }
}

/// Returns the `index`-th (1-based) `separator`-delimited field of `content`.
///
/// The last field runs to the end of `content`. An index past the last field
/// yields an empty slice.
///
/// # Examples
///
/// ```rust
/// use uq::input::select_field;
///
/// assert_eq!(select_field(b"u1;http://a.com/p;extra", 2, b';'), b"http://a.com/p");
/// assert_eq!(select_field(b"a;b", 2, b';'), b"b");
/// assert_eq!(select_field(b"a;b", 5, b';'), b"");
/// ```
#[must_use]
pub fn select_field(content: &[u8], index: usize, separator: u8) -> &[u8] {
    if index == 0 {
        return content;
    }
    content
        .split(|&b| b == separator)
        .nth(index - 1)
        .unwrap_or(&[])
}

/// Narrows records to their key field.
///
/// Stateless; built once per run from the [`DerivationConfig`].
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    field: Option<(usize, u8)>,
    case_fold: bool,
    delimiter: u8,
}

impl FieldExtractor {
    /// Creates an extractor for records terminated by `delimiter`.
    #[must_use]
    pub fn new(config: &DerivationConfig, delimiter: u8) -> Self {
        Self {
            field: config.field.map(|f| (f.index, f.separator)),
            case_fold: config.case_fold,
            delimiter,
        }
    }

    /// Returns the bytes of `record` that are hashed.
    ///
    /// The record delimiter is dropped, the configured field is selected and,
    /// with case folding, ASCII letters are lowercased in a copy. The record
    /// itself is never modified.
    #[must_use]
    pub fn key_field<'a>(&self, record: &'a [u8]) -> Cow<'a, [u8]> {
        let content = strip_delimiter(record, self.delimiter);
        let field = match self.field {
            Some((index, separator)) => select_field(content, index, separator),
            None => content,
        };

        if self.case_fold && field.iter().any(u8::is_ascii_uppercase) {
            Cow::Owned(field.to_ascii_lowercase())
        } else {
            Cow::Borrowed(field)
        }
    }
}
