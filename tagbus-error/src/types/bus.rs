use std::any::Any;

use thiserror::Error;

use crate::{BoxError, ErrorExt, StatusCode};

/// Ошибки шины событий.
#[derive(Debug, Error)]
pub enum BusError {
    /// Тег не может быть пустой строкой.
    #[error("tag must not be empty")]
    EmptyTag,

    /// Отправка в тег без слушателей в строгом режиме.
    ///
    /// В режиме по умолчанию отправка в неизвестный тег ничего не делает.
    #[error("unknown tag: {tag}")]
    UnknownTag { tag: String },

    /// Слушатель вернул ошибку. Хранится первая ошибка рассылки.
    #[error("listener #{position} on tag '{tag}' failed: {source}")]
    Listener {
        tag: String,
        position: usize,
        #[source]
        source: BoxError,
    },

    /// Слушатель запаниковал во время рассылки.
    #[error("listener #{position} on tag '{tag}' panicked: {message}")]
    ListenerPanicked {
        tag: String,
        position: usize,
        message: String,
    },
}

impl BusError {
    /// Исходная ошибка слушателя, если рассылка завершилась его ошибкой.
    pub fn listener_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Listener { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl ErrorExt for BusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyTag => StatusCode::InvalidTag,
            Self::UnknownTag { .. } => StatusCode::NotFound,
            Self::Listener { .. } => StatusCode::ListenerFailed,
            Self::ListenerPanicked { .. } => StatusCode::ListenerPanicked,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::UnknownTag { tag } => tags.push(("tag", tag.clone())),
            Self::Listener { tag, position, .. } | Self::ListenerPanicked { tag, position, .. } => {
                tags.push(("tag", tag.clone()));
                tags.push(("position", position.to_string()));
            }
            Self::EmptyTag => {}
        }

        tags
    }
}
