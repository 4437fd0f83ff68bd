use bb_core::env_bool;
use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Console output goes to stderr so stdout
/// stays free for command results. Safe to call more than once.
pub fn init() {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());
    let registry = tracing_subscriber::registry().with(console);

    if env_bool("BB_LOG_ROLL").unwrap_or(false) {
        let dir = std::env::var("BB_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
        let prefix = std::env::var("BB_LOG_PREFIX").unwrap_or_else(|_| "bb".into());
        let rotation = std::env::var("BB_LOG_ROTATION").unwrap_or_else(|_| "daily".into());
        if std::fs::create_dir_all(&dir).is_err() {
            tracing::warn!(directory = %dir, "failed to create log directory");
        }
        let writer = match rotation.to_lowercase().as_str() {
            "hourly" => tracing_appender::rolling::hourly(&dir, &prefix),
            "minutely" => tracing_appender::rolling::minutely(&dir, &prefix),
            _ => tracing_appender::rolling::daily(&dir, &prefix),
        };
        let (nb, guard) = tracing_appender::non_blocking(writer);
        let _ = FILE_GUARD.set(guard);
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(nb)
            .with_filter(filter());
        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}
