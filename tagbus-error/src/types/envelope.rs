use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки кодирования и разбора конвертов.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("failed to encode envelope: {reason}")]
    Encode { reason: String },

    #[error("failed to decode envelope: {reason}")]
    Decode { reason: String },

    /// Конверт не того вида (например, запрос пришёл в тег ответа).
    #[error("unexpected envelope kind: expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("correlation id mismatch: expected {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },

    /// Запрос без адреса для ответа.
    #[error("request envelope on '{topic}' has no reply_to topic")]
    MissingReplyTo { topic: String },

    #[error("envelope on '{topic}' has no correlation id")]
    MissingCorrelationId { topic: String },
}

impl ErrorExt for EnvelopeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Encode { .. } => StatusCode::SerializationFailed,
            Self::Decode { .. } => StatusCode::DeserializationFailed,
            Self::UnexpectedKind { .. } => StatusCode::UnexpectedKind,
            Self::CorrelationMismatch { .. } => StatusCode::CorrelationMismatch,
            Self::MissingReplyTo { .. } => StatusCode::InvalidTopic,
            Self::MissingCorrelationId { .. } => StatusCode::CorrelationMismatch,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
