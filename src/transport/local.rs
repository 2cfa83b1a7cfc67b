use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use globset::{GlobBuilder, GlobMatcher};
use tagbus_error::TransportError;
use tracing::{debug, info, trace};

use super::{MessageHandler, SubscriptionHandle, Transport};

struct LocalSubscription {
    filter: String,
    matcher: GlobMatcher,
    handler: MessageHandler,
}

/// Петлевой транспорт внутри процесса.
///
/// Фильтры подписок это glob-шаблоны по сегментам топика: `*` совпадает
/// с одним сегментом, `**` с любым числом сегментов. Обработчики вызываются
/// синхронно в потоке публикующего.
///
/// Создаётся подключённым. Подписки переживают `disconnect`, а публикация
/// в отключённом состоянии возвращает [`TransportError::NotConnected`].
pub struct LocalTransport {
    subscriptions: DashMap<u64, LocalSubscription>,
    next_id: AtomicU64,
    connected: AtomicBool,
    published: AtomicU64,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            published: AtomicU64::new(0),
        }
    }

    pub fn connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Local transport connected");
        }
    }

    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Local transport disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Количество успешных публикаций.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn compile(filter: &str) -> Result<GlobMatcher, TransportError> {
        if filter.is_empty() {
            return Err(TransportError::InvalidFilter {
                filter: filter.to_string(),
                reason: "empty filter".to_string(),
            });
        }
        GlobBuilder::new(filter)
            .literal_separator(true)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|e| TransportError::InvalidFilter {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalTransport {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if topic.is_empty() {
            return Err(TransportError::PublishFailed {
                topic: String::new(),
                reason: "empty topic".to_string(),
            });
        }

        // обработчики вызываются без замков карты: они могут подписываться
        // и публиковать сами
        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.matcher.is_match(topic))
            .map(|sub| sub.handler.clone())
            .collect();

        self.published.fetch_add(1, Ordering::Relaxed);
        trace!(topic, receivers = handlers.len(), "Local publish");
        for handler in handlers {
            handler(topic, payload.clone());
        }
        Ok(())
    }

    fn subscribe(
        &self,
        filter: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, TransportError> {
        let matcher = Self::compile(filter)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.insert(
            id,
            LocalSubscription {
                filter: filter.to_string(),
                matcher,
                handler,
            },
        );
        debug!(id, filter, "Local subscription added");
        Ok(SubscriptionHandle::new(id, filter))
    }

    fn unsubscribe(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<(), TransportError> {
        match self.subscriptions.remove(&handle.id()) {
            Some((id, sub)) => {
                debug!(id, filter = %sub.filter, "Local subscription removed");
                Ok(())
            }
            None => Err(TransportError::UnknownSubscription { id: handle.id() }),
        }
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("subscriptions", &self.subscriptions.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rstest::rstest;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<(String, Bytes)>>>, MessageHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: Bytes| {
            s.lock().unwrap().push((topic.to_string(), payload));
        });
        (seen, handler)
    }

    #[rstest]
    #[case("svc/echo", "svc/echo", true)]
    #[case("svc/echo", "svc/echo/x", false)]
    #[case("svc/*", "svc/echo", true)]
    #[case("svc/*", "svc/echo/reply-to/1", false)]
    #[case("svc/**", "svc/echo/reply-to/1", true)]
    #[case("**/reply-to/*", "svc/echo/reply-to/abc", true)]
    #[case("**/reply-to/*", "svc/echo", false)]
    fn test_filter_matching(
        #[case] filter: &str,
        #[case] topic: &str,
        #[case] expected: bool,
    ) {
        let transport = LocalTransport::new();
        let (seen, handler) = recorder();
        transport.subscribe(filter, handler).unwrap();

        transport.publish(topic, Bytes::from_static(b"x")).unwrap();
        assert_eq!(seen.lock().unwrap().len(), expected as usize);
    }

    #[test]
    fn test_publish_requires_connection() {
        let transport = LocalTransport::new();
        let (seen, handler) = recorder();
        transport.subscribe("a", handler).unwrap();

        transport.disconnect();
        assert_eq!(
            transport.publish("a", Bytes::new()),
            Err(TransportError::NotConnected)
        );

        transport.connect();
        transport.publish("a", Bytes::from_static(b"1")).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(transport.published_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let transport = LocalTransport::new();
        let (seen, handler) = recorder();
        let handle = transport.subscribe("a", handler).unwrap();

        transport.unsubscribe(&handle).unwrap();
        transport.publish("a", Bytes::new()).unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            transport.unsubscribe(&handle),
            Err(TransportError::UnknownSubscription { id: handle.id() })
        );
    }

    #[test]
    fn test_invalid_filter() {
        let transport = LocalTransport::new();
        let (_, handler) = recorder();
        assert!(matches!(
            transport.subscribe("a/[", handler.clone()),
            Err(TransportError::InvalidFilter { .. })
        ));
        assert!(matches!(
            transport.subscribe("", handler),
            Err(TransportError::InvalidFilter { .. })
        ));
        assert_eq!(transport.subscription_count(), 0);
    }

    /// Тест проверяет, что обработчик может публиковать из своего вызова.
    #[test]
    fn test_handler_can_publish_reentrantly() {
        let transport = Arc::new(LocalTransport::new());
        let (seen, handler) = recorder();
        transport.subscribe("out", handler).unwrap();

        let t = Arc::downgrade(&transport);
        transport
            .subscribe(
                "in",
                Arc::new(move |_: &str, payload: Bytes| {
                    if let Some(t) = t.upgrade() {
                        t.publish("out", payload).unwrap();
                    }
                }),
            )
            .unwrap();

        transport.publish("in", Bytes::from_static(b"ping")).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, Bytes::from_static(b"ping"));
    }
}
