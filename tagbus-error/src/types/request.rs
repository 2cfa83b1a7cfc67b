use std::{any::Any, time::Duration};

use thiserror::Error;

use crate::{BusError, EnvelopeError, ErrorExt, StatusCode, TransportError};

/// Ошибки запроса с ожиданием ответа.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Ответ не пришёл за отведённое время. Можно повторить с новым
    /// идентификатором корреляции.
    #[error("request {correlation_id} on '{topic}' timed out after {timeout:?}")]
    Timeout {
        correlation_id: String,
        topic: String,
        timeout: Duration,
    },

    /// Идентификатор уже занят другим ожидающим запросом.
    #[error("correlation id {correlation_id} is already pending")]
    DuplicateCorrelation { correlation_id: String },

    #[error("request {correlation_id} was cancelled")]
    Cancelled { correlation_id: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl RequestError {
    /// Идентификатор корреляции, к которому относится ошибка.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Timeout { correlation_id, .. }
            | Self::DuplicateCorrelation { correlation_id }
            | Self::Cancelled { correlation_id } => Some(correlation_id),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl ErrorExt for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::DuplicateCorrelation { .. } => StatusCode::AlreadyExists,
            Self::Cancelled { .. } => StatusCode::Cancelled,
            Self::Transport(e) => e.status_code(),
            Self::Envelope(e) => e.status_code(),
            Self::Bus(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "request".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Some(cid) = self.correlation_id() {
            tags.push(("correlation_id", cid.to_string()));
        }
        tags
    }
}
