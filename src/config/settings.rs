use std::path::Path;

use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{logging::LoggingConfig, BridgeConfig, BusConfig, RouterConfig};

/// Префикс переменных окружения: `TAGBUS_ROUTER__DEFAULT_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "TAGBUS";
const ENV_SEPARATOR: &str = "__";

/// Настройки всех частей хаба.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bus: BusConfig,
    pub router: RouterConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Значения по умолчанию, затем переменные окружения.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Значения по умолчанию, затем TOML-файл, затем переменные окружения.
    /// Отсутствующий файл не ошибка.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        Self::builder()?
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let defaults = Config::try_from(&Settings::default())?;
        Ok(Config::builder().add_source(defaults))
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .with_list_parse_key("logging.directives")
            .try_parsing(true)
    }
}
