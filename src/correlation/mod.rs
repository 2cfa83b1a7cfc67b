//! Запросы с ожиданием ответа поверх шины.
//!
//! - `router`: [`CorrelationRouter`], клиентская сторона.
//! - `responder`: [`Responder`], серверная сторона.
//! - `id`: генерация идентификаторов корреляции.

pub mod id;
pub mod responder;
pub mod router;
mod slot;

pub use id::IdStrategy;
pub use responder::{Responder, ResponderStats};
pub use router::{CorrelationRouter, PendingRequest, RouterConfig};
