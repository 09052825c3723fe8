//! Utilities for logging.
use std::io;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    HumanReadable,
    Json,
}

/// Configure the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over `level`. Calling this more than
/// once is a no-op for every call after the first.
pub fn configure_global_logger<W>(level: Level, format: LogFormat, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let result = match format {
        LogFormat::HumanReadable => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Failed to configure global logger: {e}");
    }
}

/// Configure logging to stderr at the given level.
pub fn init(level: Level, format: LogFormat) {
    configure_global_logger(level, format, io::stderr);
}

/// Install a subscriber that writes through the test harness' captured
/// output. Safe to call from every test.
pub fn init_test() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(Level::DEBUG.into())
            .from_env_lossy();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}
