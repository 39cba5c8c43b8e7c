//! The ingestion pipeline.
//!
//! Each record goes through
//! `read -> derive key -> (stage in presort buffer)? -> resolve -> emit -> (commit)?`.
//!
//! Resolution is `insert_if_absent` in dedup mode and `contains` in check
//! mode. Resolved records are counted, and every `batch_size` of them the
//! open batch is committed. Records suppressed inside the presort buffer
//! never reach the index and do not count towards a batch.
//!
//! # Output order
//!
//! Output follows resolution order. Without presort that is arrival order;
//! with presort it is the order in which the buffer releases records, which
//! also applies to invert mode.
//!
//! # Failure
//!
//! A backend or output failure aborts the open batch and is returned as
//! [`Error::AtLine`] with the line of the record being resolved. Batches
//! committed earlier stay durable. A closed output pipe is not a failure: the
//! run stops reading, resolves what is staged without writing, and commits.

use crate::config::{PipelineConfig, UqConfig};
use crate::input::{FieldExtractor, LineSource};
use crate::models::{IndexKey, KeySize, OutputFormat, RunMode};
use crate::services::{KeyDeriver, OfferResult, PresortBuffer};
use crate::storage::PersistentSet;
use crate::{Error, Result};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records read.
    pub records: u64,
    /// Records resolved against the index.
    pub resolved: u64,
    /// Resolved records whose key was new.
    pub unseen: u64,
    /// Records written (or reported, in seen format).
    pub emitted: u64,
    /// Records dropped by the presort buffer without an index lookup.
    pub presort_suppressed: u64,
    /// Batches committed.
    pub batches: u64,
    /// The run stopped because of cancellation or a closed output.
    pub cancelled: bool,
}

/// Drives records from a [`LineSource`] through one [`PersistentSet`].
pub struct IngestionPipeline<W: Write> {
    set: Box<dyn PersistentSet>,
    out: W,
    extractor: FieldExtractor,
    deriver: KeyDeriver,
    key_size: KeySize,
    config: PipelineConfig,
    presort: Option<PresortBuffer>,
    pending: usize,
    batch_open: bool,
    output_closed: bool,
    progress: Arc<AtomicU64>,
    stats: PipelineStats,
}

impl<W: Write> IngestionPipeline<W> {
    /// Builds a pipeline writing to `out`.
    ///
    /// The presort prefix width is clamped to the key width of `set`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if presort is combined with check mode.
    pub fn new(config: &UqConfig, set: Box<dyn PersistentSet>, out: W) -> Result<Self> {
        let pipeline = config.pipeline.clone();
        if pipeline.presort.is_some() && pipeline.mode.is_read_only() {
            return Err(Error::InvalidInput(
                "presort cannot be combined with check mode".to_string(),
            ));
        }

        let key_size = set.key_size();
        let presort = pipeline.presort.map(|presort| {
            PresortBuffer::new(
                presort.capacity,
                presort.effective_prefix(key_size.bytes()),
            )
        });
        let deriver = KeyDeriver::new(config.derivation.url_mode);

        tracing::debug!(
            backend = set.backend_name(),
            mode = pipeline.mode.as_str(),
            output = pipeline.output.as_str(),
            invert = pipeline.invert,
            key_width = key_size.bytes(),
            url_mode = deriver.url_mode(),
            presort = ?presort.as_ref().map(PresortBuffer::capacity),
            presort_prefix = ?presort.as_ref().map(PresortBuffer::prefix_width),
            batch_size = pipeline.batch_size,
            "Pipeline configured"
        );

        Ok(Self {
            set,
            out,
            extractor: FieldExtractor::new(&config.derivation, pipeline.delimiter),
            deriver,
            key_size,
            config: pipeline,
            presort,
            pending: 0,
            batch_open: false,
            output_closed: false,
            progress: Arc::new(AtomicU64::new(0)),
            stats: PipelineStats::default(),
        })
    }

    /// Shared count of records read, for progress reporting.
    pub fn progress_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.progress)
    }

    /// Counters so far.
    pub const fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Processes every record of `source`, then drains and commits.
    ///
    /// A closed output cancels the source's token so reading stops early.
    ///
    /// # Errors
    ///
    /// Returns the first input, output or backend error. The open batch is
    /// aborted first.
    pub fn run<R: BufRead>(mut self, source: &mut LineSource<R>) -> Result<PipelineStats> {
        loop {
            let line = self.stats.records + 1;
            let record = match source.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => {
                    self.abort_open_batch();
                    return Err(Error::AtLine {
                        line,
                        source: Box::new(err),
                    });
                },
            };
            self.process(line, record)?;

            if self.output_closed && !source.token().is_cancelled() {
                tracing::info!(line, "Output closed, stopping input");
                source.token().cancel();
            }
        }

        if source.token().is_cancelled() {
            self.stats.cancelled = true;
            tracing::info!(records = self.stats.records, "Cancellation observed");
        }
        self.finish()
    }

    /// Processes one record read at 1-based `line`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AtLine`] if resolving or emitting a record fails.
    pub fn process(&mut self, line: u64, record: &[u8]) -> Result<()> {
        self.stats.records += 1;
        self.progress.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("uq_records_total").increment(1);

        let key = self.derive_key(record);
        let offered = self
            .presort
            .as_mut()
            .map(|buffer| buffer.offer(key, line, record));

        match offered {
            None => self.resolve(line, &key, record),
            Some(OfferResult::Staged) => Ok(()),
            Some(OfferResult::DuplicateSuppressed) => {
                self.stats.presort_suppressed += 1;
                metrics::counter!("uq_presort_suppressed_total").increment(1);
                tracing::trace!(line, "Duplicate suppressed in presort buffer");
                self.emit(line, record, true)
                    .map_err(|err| self.fail(line, err))
            },
            Some(OfferResult::Evicted(entry)) => self.resolve(entry.line, &entry.key, &entry.record),
        }
    }

    /// Drains the presort buffer, commits the open batch and flushes output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AtLine`] if resolving a staged record fails, or the
    /// commit or flush error.
    pub fn finish(mut self) -> Result<PipelineStats> {
        if let Some(mut buffer) = self.presort.take() {
            let staged: Vec<_> = buffer.drain().collect();
            tracing::debug!(staged = staged.len(), "Draining presort buffer");
            for entry in staged {
                self.resolve(entry.line, &entry.key, &entry.record)?;
            }
        }

        if self.batch_open {
            self.commit()?;
        }

        match self.out.flush() {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => self.output_closed = true,
            Err(e) => return Err(Error::operation("write_output", e)),
        }
        if self.output_closed {
            self.stats.cancelled = true;
        }

        tracing::info!(
            backend = self.set.backend_name(),
            records = self.stats.records,
            emitted = self.stats.emitted,
            unseen = self.stats.unseen,
            presort_suppressed = self.stats.presort_suppressed,
            batches = self.stats.batches,
            cancelled = self.stats.cancelled,
            "Pipeline finished"
        );
        Ok(self.stats)
    }

    fn derive_key(&self, record: &[u8]) -> IndexKey {
        let field = self.extractor.key_field(record);
        self.deriver.fingerprint(&field).index_key(self.key_size)
    }

    fn resolve(&mut self, line: u64, key: &IndexKey, record: &[u8]) -> Result<()> {
        let seen = match self.lookup(key) {
            Ok(seen) => seen,
            Err(err) => return Err(self.fail(line, err)),
        };
        self.stats.resolved += 1;
        if !seen {
            self.stats.unseen += 1;
        }
        tracing::trace!(line, %key, seen, "Resolved record");

        if let Err(err) = self.emit(line, record, seen) {
            return Err(self.fail(line, err));
        }

        if self.config.mode == RunMode::Dedup {
            self.pending += 1;
            if self.pending >= self.config.batch_size {
                self.commit().map_err(|err| Error::AtLine {
                    line,
                    source: Box::new(err),
                })?;
            }
        }
        Ok(())
    }

    fn lookup(&mut self, key: &IndexKey) -> Result<bool> {
        match self.config.mode {
            RunMode::Check => self.set.contains(key),
            RunMode::Dedup => {
                if !self.batch_open {
                    self.set.begin_batch()?;
                    self.batch_open = true;
                }
                Ok(!self.set.insert_if_absent(key)?)
            },
        }
    }

    /// Writes the decision for one record.
    ///
    /// `flag` is the reported bit: `seen`, flipped by invert. Passthrough
    /// writes the record when the flag is clear.
    fn emit(&mut self, line: u64, record: &[u8], seen: bool) -> Result<()> {
        if self.output_closed {
            return Ok(());
        }
        let flag = seen != self.config.invert;
        let written = match self.config.output {
            OutputFormat::Passthrough if flag => return Ok(()),
            OutputFormat::Passthrough => self.out.write_all(record),
            OutputFormat::Seen => writeln!(self.out, "{line} {}", u8::from(flag)),
        };
        let written = written.and_then(|()| {
            if self.config.line_buffered {
                self.out.flush()
            } else {
                Ok(())
            }
        });

        match written {
            Ok(()) => {
                self.stats.emitted += 1;
                metrics::counter!("uq_records_emitted_total").increment(1);
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.output_closed = true;
                Ok(())
            },
            Err(e) => Err(Error::operation("write_output", e)),
        }
    }

    fn commit(&mut self) -> Result<()> {
        self.batch_open = false;
        self.pending = 0;
        self.set.commit_batch()?;
        self.stats.batches += 1;
        metrics::counter!("uq_batches_committed_total").increment(1);
        tracing::trace!(batches = self.stats.batches, "Committed batch");
        Ok(())
    }

    fn abort_open_batch(&mut self) {
        if !self.batch_open {
            return;
        }
        self.batch_open = false;
        self.pending = 0;
        if let Err(err) = self.set.abort_batch() {
            tracing::error!(error = %err, "Failed to abort batch");
        }
    }

    fn fail(&mut self, line: u64, err: Error) -> Error {
        tracing::error!(line, error = %err, "Record failed, aborting open batch");
        self.abort_open_batch();
        Error::AtLine {
            line,
            source: Box::new(err),
        }
    }
}

/// Runs a whole configured pipeline over `source`, writing to `out`.
///
/// Convenience for callers that do not need the pipeline between records.
///
/// # Errors
///
/// Returns any error of [`IngestionPipeline::new`] or
/// [`IngestionPipeline::run`].
pub fn run_pipeline<R: BufRead, W: Write>(
    config: &UqConfig,
    set: Box<dyn PersistentSet>,
    source: &mut LineSource<R>,
    out: W,
) -> Result<PipelineStats> {
    IngestionPipeline::new(config, set, out)?.run(source)
}
