use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки транспортного адаптера.
///
/// Ядро не повторяет операции: политика повторов принадлежит адаптеру или
/// приложению.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("failed to publish to '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("failed to subscribe to '{filter}': {reason}")]
    SubscribeFailed { filter: String, reason: String },

    #[error("invalid topic filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("unknown subscription #{id}")]
    UnknownSubscription { id: u64 },
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::NotConnected,
            Self::PublishFailed { .. } => StatusCode::PublishFailed,
            Self::SubscribeFailed { .. } => StatusCode::SubscribeFailed,
            Self::InvalidFilter { .. } => StatusCode::InvalidTopic,
            Self::UnknownSubscription { .. } => StatusCode::NotFound,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::PublishFailed { topic, .. } => tags.push(("topic", topic.clone())),
            Self::SubscribeFailed { filter, .. } | Self::InvalidFilter { filter, .. } => {
                tags.push(("filter", filter.clone()))
            }
            _ => {}
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_codes_are_transport_range() {
        let errs = [
            TransportError::NotConnected,
            TransportError::PublishFailed {
                topic: "a".into(),
                reason: "b".into(),
            },
        ];
        for err in errs {
            assert!(err.status_code().is_transport_error(), "{err}");
            assert!(err.status_code().is_retryable(), "{err}");
        }
    }

    #[test]
    fn test_publish_failed_tags() {
        let err = TransportError::PublishFailed {
            topic: "sensors/1".into(),
            reason: "broker gone".into(),
        };
        let tags = err.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "topic" && v == "sensors/1"));
        assert_eq!(
            err.to_string(),
            "failed to publish to 'sensors/1': broker gone"
        );
    }
}
