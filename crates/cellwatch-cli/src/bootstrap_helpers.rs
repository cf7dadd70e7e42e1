use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// WARN unless `RUST_LOG` says otherwise; logs go to stderr so stdout stays parseable.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
