//! Binary entry point for uq.
//!
//! Streams stdin through the configured index and writes to stdout.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufWriter};
use std::process::ExitCode;
use uq::cli::Cli;
use uq::config::ConfigFile;
use uq::observability::{self, DEFAULT_INTERVAL, ProgressReporter};
use uq::{CancellationToken, IngestionPipeline, LineSource, SignalCounter, UqConfig, storage};

/// Exit status after a second interrupt.
const EXIT_INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout with status 0, usage errors exit 2.
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2));
        },
    };

    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("uq: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(&config.observability, config.verbose) {
        eprintln!("uq: failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Run failed");
            eprintln!("uq: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Resolves the configuration file and merges flags over it.
fn load_config(cli: Cli) -> anyhow::Result<UqConfig> {
    let file = ConfigFile::discover(cli.config.as_deref()).context("loading config file")?;
    let config = cli.into_config(file).context("applying options")?;
    config.validate().context("invalid options")?;
    Ok(config)
}

fn run(config: &UqConfig) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    install_signal_handler(token.clone())?;

    let mode = config.open_mode();
    let set = storage::open_persistent_set(&config.storage, mode).with_context(|| {
        format!(
            "opening {} index {}",
            config.storage.backend.as_str(),
            config.storage.path.display()
        )
    })?;

    let stdout = io::stdout();
    let out = BufWriter::with_capacity(config.pipeline.prefetch_size, stdout.lock());
    let pipeline = IngestionPipeline::new(config, set, out)?;

    let _progress = if config.verbose {
        Some(ProgressReporter::spawn(pipeline.progress_counter(), DEFAULT_INTERVAL)?)
    } else {
        None
    };

    let mut source = LineSource::buffered(io::stdin().lock(), &config.pipeline, token);
    let stats = pipeline.run(&mut source)?;

    tracing::info!(
        records = stats.records,
        emitted = stats.emitted,
        unseen = stats.unseen,
        batches = stats.batches,
        cancelled = stats.cancelled,
        "Done"
    );
    Ok(())
}

/// Cancels `token` on the first SIGINT/SIGTERM and exits on the second.
///
/// A read blocked on an idle stdin never sees the token, so the second
/// signal is the way out. Signals are counted apart from the token, which a
/// closed stdout may have cancelled already.
fn install_signal_handler(token: CancellationToken) -> anyhow::Result<()> {
    let signals = SignalCounter::new();
    ctrlc::set_handler(move || {
        if signals.record() {
            std::process::exit(EXIT_INTERRUPTED);
        }
        token.cancel();
        tracing::info!("Interrupt received, finishing current batch");
    })
    .context("installing signal handler")
}
