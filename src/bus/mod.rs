//! Шина событий с подпиской по тегам.
//!
//! - `event_bus`: рассылка, регистрация слушателей, очистка тегов.
//! - `listener`: хэндл слушателя и его идентичность.
//! - `registry` (приватный): реестр тегов с двухуровневой блокировкой.

pub mod event_bus;
pub mod listener;
mod registry;

pub use event_bus::*;
pub use listener::*;
