//! Конверт сообщения: полезная нагрузка плюс метаданные маршрутизации.
//!
//! Вид конверта (`request`, `reply`, `event`) задаётся явным полем-
//! дискриминантом и разбирается сопоставлением с образцом. На проводе
//! конверт кодируется в JSON.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagbus_error::EnvelopeError;

/// Сегмент топика, отделяющий топик запроса от идентификатора ответа.
pub const DEFAULT_REPLY_SEGMENT: &str = "reply-to";

/// Вид конверта.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Request,
    Reply,
    Event,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Reply => "reply",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Идентификатор корреляции запроса и ответа.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Полезная нагрузка сообщения.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Bytes(Bytes),
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// Нагрузка как байты (для JSON — его сериализованная форма).
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Self::Json(v) => Bytes::from(v.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(b: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(b))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// Конверт, который получают слушатели шины.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl Envelope {
    /// Событие без корреляции.
    pub fn event(
        topic: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            topic: topic.into(),
            correlation_id: None,
            reply_to: None,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Запрос, ответ на который ожидается в топике `reply_to`.
    pub fn request(
        topic: impl Into<String>,
        correlation_id: CorrelationId,
        reply_to: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            topic: topic.into(),
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to.into()),
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Ответ с явно заданным топиком.
    pub fn reply(
        topic: impl Into<String>,
        correlation_id: CorrelationId,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Reply,
            topic: topic.into(),
            correlation_id: Some(correlation_id),
            reply_to: None,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Строит ответ на этот запрос: адрес берётся из `reply_to`,
    /// идентификатор корреляции переносится.
    pub fn reply_to_request(
        &self,
        payload: impl Into<Payload>,
    ) -> Result<Self, EnvelopeError> {
        if self.kind != EnvelopeKind::Request {
            return Err(EnvelopeError::UnexpectedKind {
                expected: EnvelopeKind::Request.as_str(),
                actual: self.kind.as_str(),
            });
        }
        let Some(reply_to) = self.reply_to.clone() else {
            return Err(EnvelopeError::MissingReplyTo {
                topic: self.topic.clone(),
            });
        };
        let correlation_id = self
            .correlation_id
            .clone()
            .ok_or_else(|| EnvelopeError::MissingCorrelationId {
                topic: self.topic.clone(),
            })?;
        Ok(Self::reply(reply_to, correlation_id, payload))
    }

    pub fn is_request(&self) -> bool {
        self.kind == EnvelopeKind::Request
    }
}

/// Топик ответа: `{request_topic}/{segment}/{correlation_id}`.
pub fn reply_topic(
    request_topic: &str,
    segment: &str,
    correlation_id: &CorrelationId,
) -> String {
    format!("{request_topic}/{segment}/{correlation_id}")
}

/// Кодирует конверт в JSON.
pub fn encode(envelope: &Envelope) -> Result<Bytes, EnvelopeError> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|e| EnvelopeError::Encode {
            reason: e.to_string(),
        })
}

/// Разбирает конверт из JSON.
pub fn decode(data: &[u8]) -> Result<Envelope, EnvelopeError> {
    serde_json::from_slice(data).map_err(|e| EnvelopeError::Decode {
        reason: e.to_string(),
    })
}
