//! Record input: splitting a byte stream into records and narrowing each
//! record to the bytes that are hashed.

mod cancel;
mod field;
mod line_source;

pub use cancel::{CancellationToken, SignalCounter};
pub use field::{FieldExtractor, select_field, strip_delimiter};
pub use line_source::LineSource;
