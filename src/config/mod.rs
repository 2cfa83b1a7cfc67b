//! Загрузка настроек: значения по умолчанию, TOML-файл и окружение.

pub mod settings;

pub use settings::{Settings, ENV_PREFIX};
