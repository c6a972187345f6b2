//! This crate provides logging initialization for the ide-lint client.
//!
//! It supports three modes:
//! - CLI mode: logs to STDERR (STDOUT carries analysis results).
//! - Embedded mode: logs to STDERR and to a rolling file, used when the
//!   client runs inside an IDE host that captures STDERR.
//! - Background mode: JSON logs to a rolling file in the data directory.
//!
//! The file logs are rolled over when they reach 5 MB. Rotated logs are
//! compressed. The maximum number of rotated logs is 20.

use analysis_state::DataDirectory;
use anyhow::Result;
use file_rotate::{ContentLimit, FileRotate, compression::Compression, suffix::AppendCount};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt::writer::MakeWriterExt};

const MAX_LOG_FILES: usize = 20;
const MAX_LOG_FILE_BYTES: usize = 5 * 1024 * 1024;
const STDERR_BUFFERED_LINES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Cli,
    Embedded,
    Background,
}

/// Guard that keeps background logging workers alive.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn init(mode: LogMode, verbose: bool, data_directory: &DataDirectory) -> Result<Option<LoggingGuards>> {
    let filter = build_filter(verbose);

    match mode {
        LogMode::Cli => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
            Ok(None)
        }
        LogMode::Embedded => {
            data_directory.ensure_directory_structure()?;
            let (file_non_blocking, file_guard) =
                tracing_appender::non_blocking(rotating_writer(data_directory));
            // The IDE host may stop draining STDERR; bound the buffer and drop
            // overflowing lines instead of blocking the analysis tasks.
            let (stderr_non_blocking, stderr_guard) = NonBlockingBuilder::default()
                .lossy(true)
                .buffered_lines_limit(STDERR_BUFFERED_LINES)
                .finish(std::io::stderr());

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(
                    file_non_blocking
                        .with_max_level(tracing::Level::INFO)
                        .and(stderr_non_blocking),
                )
                .with_ansi(false)
                .init();

            Ok(Some(LoggingGuards {
                _guards: vec![file_guard, stderr_guard],
            }))
        }
        LogMode::Background => {
            data_directory.ensure_directory_structure()?;
            let (non_blocking, guard) = tracing_appender::non_blocking(rotating_writer(data_directory));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking.with_max_level(tracing::Level::INFO))
                .with_ansi(false)
                .json()
                .init();

            Ok(Some(LoggingGuards {
                _guards: vec![guard],
            }))
        }
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn rotating_writer(data_directory: &DataDirectory) -> FileRotate<AppendCount> {
    FileRotate::new(
        data_directory.log_file_path(),
        AppendCount::new(MAX_LOG_FILES),
        ContentLimit::Bytes(MAX_LOG_FILE_BYTES),
        Compression::OnRotate(1),
        None,
    )
}
