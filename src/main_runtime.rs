use spotbot::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Console plus optional daily rolling file logging.
///
/// `RUST_LOG` wins over `logging.level`; `SPOTBOT_LOG_DIR` wins over
/// `logging.log_dir`. The returned guard must outlive the program's logging.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},spotbot=debug", config.level))
    });

    let log_dir = std::env::var("SPOTBOT_LOG_DIR")
        .ok()
        .or_else(|| config.log_dir.clone());

    // `rolling::daily` panics if it cannot create the first file, so check
    // writability up front.
    let (file_layer, guard) = match log_dir.as_deref().map(writable_log_dir) {
        Some(Ok(dir)) => {
            let file_appender = tracing_appender::rolling::daily(&dir, "spotbot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            let layer = if config.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            };
            (Some(layer), Some((guard, dir)))
        }
        Some(Err(e)) => {
            eprintln!("Warning: {}, file logging disabled", e);
            (None, None)
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    let console_layer = if config.json {
        console_layer.json().boxed()
    } else {
        console_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard.map(|(guard, dir)| {
        eprintln!("Logging to: {}/spotbot.log", dir);
        guard
    })
}

fn writable_log_dir(dir: &str) -> std::result::Result<String, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("could not create log directory {} ({})", dir, e))?;

    let marker = std::path::Path::new(dir).join(".spotbot_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
        .map_err(|e| format!("could not write to log directory {} ({})", dir, e))?;
    let _ = std::fs::remove_file(&marker);

    Ok(dir.to_string())
}
