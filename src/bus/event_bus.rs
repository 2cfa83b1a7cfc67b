use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tagbus_error::BusError;
use tracing::{debug, info, trace, warn};

use super::{registry::TagRegistry, Listener};
use crate::{Envelope, Payload};

static DEFAULT_BUS: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

/// Общая для процесса шина.
///
/// Создаётся один раз при первом обращении с конфигурацией по умолчанию.
/// Приложениям, которым нужна своя конфигурация, лучше создать
/// собственный [`EventBus`] и передавать его явно.
pub fn default_bus() -> Arc<EventBus> {
    DEFAULT_BUS.clone()
}

/// Что делать с отправкой в тег без слушателей.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownTagPolicy {
    /// Ничего не делать.
    #[default]
    Ignore,
    /// Ничего не делать, но записать в лог.
    Log,
    /// Строгий режим: вернуть [`BusError::UnknownTag`].
    Reject,
}

/// Настройки шины.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub unknown_tag: UnknownTagPolicy,
}

/// Счётчики шины.
#[derive(Debug, Default)]
struct BusMetrics {
    sends: AtomicU64,
    deliveries: AtomicU64,
    listener_failures: AtomicU64,
    unknown_tag_sends: AtomicU64,
}

/// Снимок счётчиков шины.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub sends: u64,
    pub deliveries: u64,
    pub listener_failures: u64,
    pub unknown_tag_sends: u64,
}

/// Шина событий с подпиской по тегам.
///
/// - Слушатели тега вызываются синхронно, в порядке регистрации, под
///   замком тега.
/// - Ошибка или паника слушателя не прерывает рассылку: вызываются все,
///   а первая ошибка возвращается после рассылки.
/// - Отправка в неизвестный тег по умолчанию ничего не делает.
///
/// Слушатель может менять подписки своего тега изнутри вызова. Слушатели,
/// которые синхронно шлют в другие теги, должны избегать циклов между
/// потоками: замки тегов берутся в порядке вложенности вызовов.
pub struct EventBus {
    registry: TagRegistry,
    config: BusConfig,
    metrics: BusMetrics,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            registry: TagRegistry::new(),
            config,
            metrics: BusMetrics::default(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Регистрирует слушателя в теге. Тег создаётся при первой регистрации.
    ///
    /// Повторная регистрация того же слушателя (или его клона) ничего не
    /// меняет.
    pub fn add_listen(
        &self,
        tag: &str,
        listener: Listener,
    ) -> Result<(), BusError> {
        if tag.is_empty() {
            return Err(BusError::EmptyTag);
        }
        let id = listener.id();
        if self.registry.insert(tag, listener) {
            debug!(tag, listener = %id, "Listener registered");
        } else {
            trace!(tag, listener = %id, "Listener already registered");
        }
        Ok(())
    }

    /// Удаляет слушателя из тега. Отсутствие тега или слушателя не ошибка.
    ///
    /// Возвращает `true`, если слушатель был удалён.
    pub fn remove_listen(
        &self,
        tag: &str,
        listener: &Listener,
    ) -> bool {
        let removed = self.registry.remove(tag, listener);
        if removed {
            debug!(tag, listener = %listener.id(), "Listener removed");
        }
        removed
    }

    /// Рассылает конверт всем слушателям тега.
    pub fn send(
        &self,
        tag: &str,
        envelope: &Envelope,
    ) -> Result<(), BusError> {
        self.metrics.sends.fetch_add(1, Ordering::Relaxed);

        let Some(slot) = self.registry.get(tag) else {
            return self.on_unknown_tag(tag);
        };

        let guard = slot.lock();
        let snapshot = {
            let state = guard.borrow();
            if state.retired {
                None
            } else {
                Some((state.listeners.clone(), state.removals))
            }
        };
        let Some((snapshot, removals)) = snapshot else {
            drop(guard);
            return self.on_unknown_tag(tag);
        };

        let mut first_failure = None;
        for (position, listener) in snapshot.iter().enumerate() {
            // удалённые по ходу рассылки больше не вызываются
            let skip = {
                let state = guard.borrow();
                state.removals != removals && !state.contains(listener)
            };
            if skip {
                continue;
            }

            let failure = match panic::catch_unwind(AssertUnwindSafe(|| listener.call(envelope))) {
                Ok(Ok(())) => {
                    self.metrics.deliveries.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(source)) => BusError::Listener {
                    tag: tag.to_string(),
                    position,
                    source,
                },
                Err(payload) => BusError::ListenerPanicked {
                    tag: tag.to_string(),
                    position,
                    message: panic_message(payload.as_ref()),
                },
            };

            self.metrics
                .listener_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                tag,
                position,
                listener = %listener.id(),
                error = %failure,
                "Listener failed during dispatch"
            );
            first_failure.get_or_insert(failure);
        }
        drop(guard);

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Оборачивает нагрузку в событие с топиком `tag` и рассылает его.
    pub fn send_payload(
        &self,
        tag: &str,
        payload: impl Into<Payload>,
    ) -> Result<(), BusError> {
        self.send(tag, &Envelope::event(tag, payload))
    }

    /// Удаляет тег вместе со всеми слушателями.
    pub fn clear_tag(
        &self,
        tag: &str,
    ) {
        if self.registry.clear(tag) {
            debug!(tag, "Tag cleared");
        }
    }

    /// Удаляет все теги.
    pub fn clear_all_tag(&self) {
        let cleared = self.registry.clear_all();
        if cleared > 0 {
            info!(tags = cleared, "All tags cleared");
        }
    }

    pub fn listener_count(
        &self,
        tag: &str,
    ) -> usize {
        self.registry.listener_count(tag)
    }

    pub fn contains_tag(
        &self,
        tag: &str,
    ) -> bool {
        self.registry.get(tag).is_some()
    }

    /// Имена тегов в произвольном порядке.
    pub fn tags(&self) -> Vec<String> {
        self.registry.tags()
    }

    pub fn tag_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            sends: self.metrics.sends.load(Ordering::Relaxed),
            deliveries: self.metrics.deliveries.load(Ordering::Relaxed),
            listener_failures: self.metrics.listener_failures.load(Ordering::Relaxed),
            unknown_tag_sends: self.metrics.unknown_tag_sends.load(Ordering::Relaxed),
        }
    }

    fn on_unknown_tag(
        &self,
        tag: &str,
    ) -> Result<(), BusError> {
        self.metrics
            .unknown_tag_sends
            .fetch_add(1, Ordering::Relaxed);
        match self.config.unknown_tag {
            UnknownTagPolicy::Ignore => {
                trace!(tag, "No listeners for tag");
                Ok(())
            }
            UnknownTagPolicy::Log => {
                info!(tag, "Message dropped: no listeners for tag");
                Ok(())
            }
            UnknownTagPolicy::Reject => Err(BusError::UnknownTag {
                tag: tag.to_string(),
            }),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("tags", &self.tag_count())
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
