//! Delimiter-terminated record reader.

use super::CancellationToken;
use crate::config::PipelineConfig;
use crate::{Error, Result};
use std::io::{BufRead, BufReader, Read};

/// Pulls delimiter-terminated records from a byte stream.
///
/// The returned record borrows an internal buffer that is reused on every
/// call, so it is only valid until the next [`next_record`](Self::next_record).
/// Records keep their delimiter; the final record may lack one.
pub struct LineSource<R> {
    reader: R,
    delimiter: u8,
    buf: Vec<u8>,
    token: CancellationToken,
    records: u64,
}

impl<R: Read> LineSource<BufReader<R>> {
    /// Wraps an unbuffered reader with a `prefetch_size` read buffer.
    pub fn buffered(reader: R, config: &PipelineConfig, token: CancellationToken) -> Self {
        LineSource::new(
            BufReader::with_capacity(config.prefetch_size, reader),
            config.delimiter,
            token,
        )
    }
}

impl<R: BufRead> LineSource<R> {
    /// Creates a source over an already buffered reader.
    pub fn new(reader: R, delimiter: u8, token: CancellationToken) -> Self {
        Self {
            reader,
            delimiter,
            buf: Vec::with_capacity(1024),
            token,
            records: 0,
        }
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` at end of stream or once cancellation has been
    /// requested; cancellation is only observed here, before a read starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the underlying read fails.
    pub fn next_record(&mut self) -> Result<Option<&[u8]>> {
        if self.token.is_cancelled() {
            return Ok(None);
        }

        self.buf.clear();
        let read = self
            .reader
            .read_until(self.delimiter, &mut self.buf)
            .map_err(|e| Error::OperationFailed {
                operation: "read_input".to_string(),
                cause: format!("after record {}: {e}", self.records),
            })?;
        if read == 0 {
            return Ok(None);
        }

        self.records += 1;
        Ok(Some(&self.buf))
    }

    /// Number of records returned so far.
    #[must_use]
    pub const fn records_read(&self) -> u64 {
        self.records
    }

    /// The cancellation token polled by this source.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(source: &mut LineSource<Cursor<Vec<u8>>>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(record) = source.next_record().unwrap() {
            out.push(record.to_vec());
        }
        out
    }

    #[test]
    fn test_reads_records_with_delimiters() {
        let mut source = LineSource::new(
            Cursor::new(b"a\nbb\n\nccc".to_vec()),
            b'\n',
            CancellationToken::new(),
        );
        let records = collect(&mut source);
        assert_eq!(
            records,
            vec![
                b"a\n".to_vec(),
                b"bb\n".to_vec(),
                b"\n".to_vec(),
                b"ccc".to_vec()
            ]
        );
        assert_eq!(source.records_read(), 4);
    }

    #[test]
    fn test_custom_delimiter() {
        let mut source =
            LineSource::new(Cursor::new(b"x\0y\0".to_vec()), 0, CancellationToken::new());
        assert_eq!(collect(&mut source), vec![b"x\0".to_vec(), b"y\0".to_vec()]);
    }

    #[test]
    fn test_cancellation_reports_end_of_stream() {
        let token = CancellationToken::new();
        let mut source = LineSource::new(Cursor::new(b"a\nb\nc\n".to_vec()), b'\n', token.clone());

        assert_eq!(source.next_record().unwrap(), Some(&b"a\n"[..]));
        token.cancel();
        assert_eq!(source.next_record().unwrap(), None);
        assert_eq!(source.records_read(), 1);
    }

    #[test]
    fn test_read_error_is_reported() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("boom"))
            }
        }

        let config = PipelineConfig::default();
        let mut source = LineSource::buffered(Failing, &config, CancellationToken::new());
        let err = source.next_record().unwrap_err();
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "read_input"));
    }
}
