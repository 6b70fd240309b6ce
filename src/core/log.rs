// Define a new module for logging initialization
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// `verbose` enables debug output for this crate; `RUST_LOG` takes precedence
/// for everything else. Long-running daemons log at info even when quiet.
pub fn init_logging(verbose: bool, daemon: bool) {
    let (level_filter, level) = match (verbose, daemon) {
        (true, _) => (LevelFilter::DEBUG, "debug"),
        (false, true) => (LevelFilter::INFO, "info"),
        (false, false) => (LevelFilter::WARN, "warn"),
    };
    let app_filter = Targets::new()
        .with_target("fundsync", level_filter)
        .with_default(LevelFilter::WARN);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with((!daemon).then(|| fmt::layer().pretty().without_time()))
        .with(daemon.then(|| fmt::layer().compact()))
        .with(app_filter)
        .with(env_filter)
        .init();
}
