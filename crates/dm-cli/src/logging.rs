//! Logging setup
//!
//! Console output goes through a compact `fmt` layer. Long-running modes
//! also append to a log file, since the detached update helper has no
//! terminal at all.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file of a normal run
pub const RUN_LOG_FILE: &str = "devmanager.log";

/// Log file of the detached update helper
pub const HELPER_LOG_FILE: &str = "update.log";

/// Filter directive for the given verbosity flags
pub fn level_for(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the verbosity flags. When `log_file` is given,
/// records at `info` and above are also appended to it; failure to open
/// the file only costs the file layer.
pub fn init(quiet: bool, verbose: u8, log_file: Option<&Path>) {
    let level = level_for(quiet, verbose);
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| level.into());

    let file_layer = log_file.and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new(file_level(level)))
            })
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(EnvFilter::new(&directive)),
        )
        .with(file_layer)
        .init();
}

/// The file keeps at least `info` so a quiet run still leaves a trail
fn file_level(console: &'static str) -> &'static str {
    match console {
        "error" | "warn" => "info",
        other => other,
    }
}
