use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Configure tracing from the command line verbosity count.
///
/// `RUST_LOG` still takes precedence over the chosen default level.
pub fn setup_tracing(verbosity_level: u8) {
    let default_level = match verbosity_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}
