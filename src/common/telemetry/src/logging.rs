use std::str::FromStr;
use std::sync::{LazyLock, Mutex, Once};

use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;

const LOG_LEVEL_ENV: &str = "SPATIAL_FEATURES_LOG_LEVEL";

/// Installs the global subscriber. Keep the returned guards alive for as long
/// as log lines should be flushed.
pub fn init_logging() -> Result<Vec<WorkerGuard>, SetGlobalDefaultError> {
    let (guards, result) = try_init_logging(log_level_from_env(Level::INFO));
    result.map(|()| guards)
}

/// Installs logging once per test binary. Tests may race on the global
/// subscriber, so a subscriber that is already installed is left alone.
pub fn init_test_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let (guards, _) = try_init_logging(log_level_from_env(Level::DEBUG));
        if let Ok(mut slot) = GLOBAL_TEST_LOG_GUARDS.lock() {
            *slot = Some(guards);
        }
    });
}

static GLOBAL_TEST_LOG_GUARDS: LazyLock<Mutex<Option<Vec<WorkerGuard>>>> =
    LazyLock::new(|| Mutex::new(None));

fn log_level_from_env(default: Level) -> Level {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| Level::from_str(level.as_str()).ok())
        .unwrap_or(default)
}

fn try_init_logging(log_level: Level) -> (Vec<WorkerGuard>, Result<(), SetGlobalDefaultError>) {
    let mut guards = vec![];

    let (stdout_write, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = Layer::new()
        .with_writer(stdout_write.with_max_level(log_level))
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true);
    guards.push(stdout_guard);

    #[cfg(not(feature = "console"))]
    let result = {
        let subscriber = Registry::default().with(stdout_layer);
        tracing::subscriber::set_global_default(subscriber)
    };
    #[cfg(feature = "console")]
    let result = {
        let subscriber = Registry::default()
            .with(stdout_layer)
            .with(console_subscriber::spawn());
        tracing::subscriber::set_global_default(subscriber)
    };

    (guards, result)
}
