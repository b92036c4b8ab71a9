use tracing_subscriber::EnvFilter;

/// Initialize structured logging with tracing-subscriber.
///
/// `APP_ENV=development` gives human-readable debug output; anything else
/// emits JSON lines at info. `RUST_LOG` overrides the level either way.
/// Everything goes to stderr so stdout stays a clean JSON envelope.
pub fn init() {
    let development = std::env::var("APP_ENV").is_ok_and(|v| v == "development");
    let level = if development { "debug" } else { "info" };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if development {
        builder.with_target(false).init();
    } else {
        builder.json().init();
    }
}
