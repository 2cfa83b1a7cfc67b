use std::{env, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

pub const ENV_LOG_LEVEL: &str = "TAGBUS_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "TAGBUS_LOG_FORMAT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingConfigError {
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid log format '{0}', expected compact, pretty or json")]
    InvalidFormat(String),

    #[error("invalid filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
}

/// Формат вывода в консоль.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(LoggingConfigError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// Настройки логирования.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error.
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_names: bool,
    /// Дополнительные директивы `EnvFilter`, например `tagbus::bus=trace`.
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            with_thread_names: false,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    /// Переменные `TAGBUS_LOG_LEVEL` и `TAGBUS_LOG_FORMAT` перекрывают
    /// значения конфигурации. Некорректный формат игнорируется.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.level = level.trim().to_string();
            }
        }
        if let Ok(format) = env::var(ENV_LOG_FORMAT) {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => eprintln!("Ignoring {ENV_LOG_FORMAT}: {e}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), LoggingConfigError> {
        Level::from_str(&self.level)
            .map_err(|_| LoggingConfigError::InvalidLevel(self.level.clone()))?;
        for directive in &self.directives {
            directive
                .parse::<tracing_subscriber::filter::Directive>()
                .map_err(|e| LoggingConfigError::InvalidDirective {
                    directive: directive.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Директива `EnvFilter`: уровень, затем дополнительные директивы.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.as_str())
            .chain(self.directives.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }
}
