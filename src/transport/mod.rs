//! Транспортный слой: внешний канал «байты по топику».
//!
//! Ядро не знает, что под ним: MQTT-клиент, локальная шина процесса или
//! что-то ещё. Ему нужен только [`Transport`]. Жизненный цикл соединения
//! принадлежит адаптеру, ошибки поднимаются наверх без повторов.
//!
//! - `local`: [`LocalTransport`], петлевой адаптер внутри процесса.
//! - `bridge`: [`Bridge`], доставка входящих кадров в [`EventBus`](crate::EventBus).

pub mod bridge;
pub mod local;

use std::{fmt, sync::Arc};

use bytes::Bytes;
use tagbus_error::TransportError;

pub use bridge::{Bridge, BridgeConfig, DeliveryMode};
pub use local::LocalTransport;

/// Обработчик входящего сообщения: топик и сырые байты.
pub type MessageHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Хэндл подписки, выданный транспортом.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    filter: Arc<str>,
}

impl SubscriptionHandle {
    pub fn new(
        id: u64,
        filter: &str,
    ) -> Self {
        Self {
            id,
            filter: Arc::from(filter),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{} ({})", self.id, self.filter)
    }
}

/// Возможности транспорта, на которые опирается ядро.
pub trait Transport: Send + Sync {
    /// Публикует байты в топик.
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Подписывает обработчик на фильтр топиков.
    fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, TransportError>;

    /// Снимает подписку.
    fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<(), TransportError>;
}
