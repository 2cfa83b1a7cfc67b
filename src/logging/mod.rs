//! Логирование на `tracing-subscriber`.
//!
//! Библиотека сама подписчик не ставит: это делает приложение через
//! [`init_logging`].

pub mod config;
mod filters;
mod formatter;

pub use self::config::{LogFormat, LoggingConfig, LoggingConfigError};
pub use filters::build_filter_from_config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализация логирования с конфигурацией.
///
/// Переменные окружения перекрывают конфигурацию, `RUST_LOG` перекрывает
/// всё. Повторная инициализация в процессе возвращает ошибку.
pub fn init_logging(mut config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.apply_env_overrides();
    config.validate()?;

    let env_filter = filters::build_filter_from_config(&config);
    let console_layer = formatter::build_layer(&config, std::io::stdout);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = %config.format,
        "Logging system initialized"
    );
    Ok(())
}
