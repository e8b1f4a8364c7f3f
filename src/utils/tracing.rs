//! Tracing Utilities Module
//!
//! This module contains tracing functionality for dispsnap,
//! including logging configuration with file output.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::utils::error::{DisplayError, Result};

static WORKER_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);
static INIT: Once = Once::new();

/// Initializes the tracing subscriber with file and optional console output.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is a
/// no-op after the first successful call.
pub fn setup_tracing(log_path: &Path, level: &str, console: bool) -> Result<()> {
    let mut outcome = Ok(());

    INIT.call_once(|| {
        outcome = install(log_path, level, console);
    });

    outcome
}

/// `RUST_LOG` if set, otherwise `level`
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn install(log_path: &Path, level: &str, console: bool) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Open log file for appending
    let file = OpenOptions::new().append(true).create(true).open(log_path)?;

    // Create non-blocking writer so native calls are never stalled by disk I/O
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlocking::new(file);

    // Keep the guard alive for the duration of the program
    if let Ok(mut slot) = WORKER_GUARD.lock() {
        *slot = Some(guard);
    }

    // Configure file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(env_filter(level));

    // Configure stdout layer for console output
    let stdout_layer = console.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_filter(env_filter(level))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| DisplayError::SystemError(format!("Failed to initialize tracing: {}", e)))
}
