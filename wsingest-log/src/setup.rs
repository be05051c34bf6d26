use std::env;
use std::io;

use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::{Level, LogConfig, LogFormat};

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Builds the default filter used when `RUST_LOG` is not set.
///
/// Third-party crates log at INFO, all crates of this workspace at the configured level.
fn default_filter(level: Level) -> EnvFilter {
    // Tungstenite traces every frame, which is never useful at INFO.
    let mut directives = vec!["info".to_owned(), "tungstenite=warn".to_owned()];
    directives.extend(CRATE_NAMES.iter().map(|name| format!("{name}={level}")));
    EnvFilter::new(directives.join(","))
}

/// Initialize the logging system.
///
/// If the `RUST_LOG` environment variable is set, it takes precedence over the configured level.
/// Calling this function more than once has no effect.
///
/// # Example
///
/// ```
/// let log_config = wsingest_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// wsingest_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: Logging is initialized at startup before any other threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));

    let subscriber = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            subscriber.compact().without_time().boxed()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}
