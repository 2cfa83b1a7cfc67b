use std::{
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use tagbus_error::{BusError, EnvelopeError, RequestError};
use tracing::{debug, trace};

use super::{
    id::IdStrategy,
    slot::{ReplySlot, SlotOutcome},
};
use crate::{
    envelope::{self, reply_topic, DEFAULT_REPLY_SEGMENT},
    transport::Transport,
    CorrelationId, Envelope, EnvelopeKind, EventBus, Listener, Payload,
};

/// Настройки роутера запросов.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Сегмент между топиком запроса и идентификатором в топике ответа.
    pub reply_segment: String,
    /// Таймаут по умолчанию для вызывающих, у которых нет своего.
    pub default_timeout_ms: u64,
    pub id_strategy: IdStrategy,
    /// Писать в лог ответы, пришедшие после таймаута или отмены.
    pub log_late_replies: bool,
}

impl RouterConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            reply_segment: DEFAULT_REPLY_SEGMENT.to_string(),
            default_timeout_ms: 5_000,
            id_strategy: IdStrategy::default(),
            log_late_replies: false,
        }
    }
}

/// Предел срока ожидания: больший таймаут (вплоть до `Duration::MAX`)
/// означает «ждать без ограничения» и урезается до него.
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Срок ожидания без переполнения `Instant`.
fn deadline_after(
    start: Instant,
    timeout: Duration,
) -> Instant {
    start
        .checked_add(timeout.min(MAX_WAIT))
        .unwrap_or(start)
}

struct PendingEntry {
    reply_tag: String,
    listener: Listener,
    slot: Arc<ReplySlot>,
    deadline: Instant,
}

struct RouterShared {
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    config: RouterConfig,
    pending: DashMap<CorrelationId, PendingEntry>,
}

impl RouterShared {
    /// Убирает запись и одноразового слушателя. Запись удаляется, только
    /// если она принадлежит этому слоту: идентификатор мог быть уже выдан
    /// заново.
    ///
    /// Шину нельзя трогать под замком записи `DashMap`, поэтому запись
    /// сначала извлекается.
    fn finish(
        &self,
        correlation_id: &CorrelationId,
        slot: &Arc<ReplySlot>,
    ) {
        let removed = self
            .pending
            .remove_if(correlation_id, |_, entry| Arc::ptr_eq(&entry.slot, slot));
        if let Some((_, entry)) = removed {
            self.bus.remove_listen(&entry.reply_tag, &entry.listener);
        }
    }
}

/// Роутер запросов и ответов поверх [`EventBus`].
///
/// Каждый запрос получает идентификатор корреляции и одноразового
/// слушателя на теге `{topic}/{reply_segment}/{id}`. Запрос уходит в
/// транспорт, ответ приходит в шину (обычно через
/// [`Bridge`](crate::Bridge)). Слушатель снимается при ответе, таймауте
/// или отмене, так что тег ответа не утекает.
///
/// Повторный ответ на тот же идентификатор попадает в уже несуществующий
/// тег и ничего не делает.
pub struct CorrelationRouter {
    shared: Arc<RouterShared>,
}

impl CorrelationRouter {
    pub fn new(
        bus: Arc<EventBus>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_config(bus, transport, RouterConfig::default())
    }

    pub fn with_config(
        bus: Arc<EventBus>,
        transport: Arc<dyn Transport>,
        config: RouterConfig,
    ) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                bus,
                transport,
                config,
                pending: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    /// Отправляет запрос и блокирует поток до ответа, таймаута или отмены.
    pub fn request(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<Payload, RequestError> {
        self.issue(topic, payload, timeout)?.wait()
    }

    /// Асинхронный вариант [`request`](Self::request). Публикация выполняется
    /// сразу, ожидание идёт на таймерах tokio.
    pub async fn request_async(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<Payload, RequestError> {
        self.issue(topic, payload, timeout)?.wait_async().await
    }

    /// [`request`](Self::request) с идентификатором вызывающего.
    pub fn request_with_id(
        &self,
        topic: &str,
        correlation_id: CorrelationId,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<Payload, RequestError> {
        self.issue_with_id(topic, correlation_id, payload, timeout)?
            .wait()
    }

    /// Отправляет запрос без ожидания.
    pub fn issue(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<PendingRequest, RequestError> {
        let correlation_id = self.shared.config.id_strategy.next_id();
        self.issue_with_id(topic, correlation_id, payload, timeout)
    }

    /// Отправляет запрос с заданным идентификатором без ожидания.
    ///
    /// Идентификатор, уже занятый ожидающим запросом, даёт
    /// [`RequestError::DuplicateCorrelation`]; ожидающий запрос при этом не
    /// затрагивается.
    pub fn issue_with_id(
        &self,
        topic: &str,
        correlation_id: CorrelationId,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<PendingRequest, RequestError> {
        if topic.is_empty() {
            return Err(BusError::EmptyTag.into());
        }
        let shared = &self.shared;
        let reply_tag = reply_topic(topic, &shared.config.reply_segment, &correlation_id);
        let slot = Arc::new(ReplySlot::new());
        let listener = reply_listener(
            Arc::downgrade(shared),
            correlation_id.clone(),
            slot.clone(),
            shared.config.log_late_replies,
        );
        let deadline = deadline_after(Instant::now(), timeout);

        match shared.pending.entry(correlation_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RequestError::DuplicateCorrelation {
                    correlation_id: correlation_id.to_string(),
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    reply_tag: reply_tag.clone(),
                    listener: listener.clone(),
                    slot: slot.clone(),
                    deadline,
                });
            }
        }

        if let Err(e) = shared.bus.add_listen(&reply_tag, listener) {
            slot.cancel();
            shared.finish(&correlation_id, &slot);
            return Err(e.into());
        }

        let request = Envelope::request(topic, correlation_id.clone(), reply_tag.clone(), payload);
        let published = envelope::encode(&request)
            .map_err(RequestError::from)
            .and_then(|frame| {
                shared
                    .transport
                    .publish(topic, frame)
                    .map_err(RequestError::from)
            });
        if let Err(e) = published {
            slot.cancel();
            shared.finish(&correlation_id, &slot);
            debug!(topic, %correlation_id, error = %e, "Request publish failed");
            return Err(e);
        }

        debug!(topic, %correlation_id, reply_tag = %reply_tag, ?timeout, "Request issued");
        Ok(PendingRequest {
            shared: shared.clone(),
            correlation_id,
            topic: topic.to_string(),
            reply_tag,
            slot,
            timeout,
            deadline,
        })
    }

    /// Отменяет ожидающий запрос. Ожидающий получает
    /// [`RequestError::Cancelled`].
    ///
    /// Возвращает `false`, если запрос уже завершён или неизвестен.
    pub fn cancel(
        &self,
        correlation_id: &CorrelationId,
    ) -> bool {
        let slot = self
            .shared
            .pending
            .get(correlation_id)
            .map(|entry| entry.slot.clone());
        match slot {
            Some(slot) if slot.cancel() => {
                self.shared.finish(correlation_id, &slot);
                debug!(%correlation_id, "Request cancelled");
                true
            }
            _ => false,
        }
    }

    /// Завершает по таймауту все запросы с истёкшим сроком, даже если их
    /// никто не ждёт. Возвращает число завершённых.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(CorrelationId, Arc<ReplySlot>)> = self
            .shared
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now && entry.slot.is_awaiting())
            .map(|entry| (entry.key().clone(), entry.slot.clone()))
            .collect();

        let mut reaped = 0;
        for (correlation_id, slot) in expired {
            if slot.expire() {
                self.shared.finish(&correlation_id, &slot);
                trace!(%correlation_id, "Expired request reaped");
                reaped += 1;
            }
        }
        if reaped > 0 {
            debug!(reaped, "Expired requests reaped");
        }
        reaped
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_pending(
        &self,
        correlation_id: &CorrelationId,
    ) -> bool {
        self.shared.pending.contains_key(correlation_id)
    }
}

impl fmt::Debug for CorrelationRouter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CorrelationRouter")
            .field("pending", &self.pending_count())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Одноразовый слушатель тега ответа. Держит роутер слабо: иначе запись
/// таблицы держала бы сама себя через слушателя.
fn reply_listener(
    shared: Weak<RouterShared>,
    expected: CorrelationId,
    slot: Arc<ReplySlot>,
    log_late: bool,
) -> Listener {
    Listener::new(move |env| {
        if env.kind == EnvelopeKind::Request {
            return Err(EnvelopeError::UnexpectedKind {
                expected: EnvelopeKind::Reply.as_str(),
                actual: env.kind.as_str(),
            }
            .into());
        }
        if let Some(actual) = &env.correlation_id {
            if actual != &expected {
                return Err(EnvelopeError::CorrelationMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }
                .into());
            }
        }

        if slot.resolve(env.clone()) {
            if let Some(shared) = shared.upgrade() {
                shared.finish(&expected, &slot);
            }
            trace!(correlation_id = %expected, "Reply received");
        } else if log_late {
            debug!(correlation_id = %expected, topic = %env.topic, "Late reply dropped");
        }
        Ok(())
    })
}

/// Отправленный запрос, ожидающий ответа.
///
/// Если запрос отбросить до ответа, он отменяется, а его слушатель
/// снимается.
pub struct PendingRequest {
    shared: Arc<RouterShared>,
    correlation_id: CorrelationId,
    topic: String,
    reply_tag: String,
    slot: Arc<ReplySlot>,
    timeout: Duration,
    deadline: Instant,
}

impl PendingRequest {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Тег, на котором ждёт одноразовый слушатель.
    pub fn reply_tag(&self) -> &str {
        &self.reply_tag
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Блокирует поток до ответа или истечения срока.
    pub fn wait(self) -> Result<Payload, RequestError> {
        let outcome = self.slot.wait_until(self.deadline);
        self.settle(outcome)
    }

    pub async fn wait_async(self) -> Result<Payload, RequestError> {
        let outcome = self.slot.wait_until_async(self.deadline).await;
        self.settle(outcome)
    }

    fn settle(
        &self,
        outcome: SlotOutcome,
    ) -> Result<Payload, RequestError> {
        match outcome {
            SlotOutcome::Resolved(env) => Ok(env.payload),
            SlotOutcome::TimedOut => Err(self.timeout_error()),
            SlotOutcome::Cancelled => Err(self.cancelled_error()),
            SlotOutcome::Pending => {
                if self.slot.expire() {
                    self.shared.finish(&self.correlation_id, &self.slot);
                    debug!(
                        topic = %self.topic,
                        correlation_id = %self.correlation_id,
                        timeout = ?self.timeout,
                        "Request timed out"
                    );
                    return Err(self.timeout_error());
                }
                // ответ или отмена успели раньше
                match self.slot.try_take() {
                    SlotOutcome::Resolved(env) => Ok(env.payload),
                    SlotOutcome::TimedOut => Err(self.timeout_error()),
                    SlotOutcome::Cancelled | SlotOutcome::Pending => Err(self.cancelled_error()),
                }
            }
        }
    }

    fn timeout_error(&self) -> RequestError {
        RequestError::Timeout {
            correlation_id: self.correlation_id.to_string(),
            topic: self.topic.clone(),
            timeout: self.timeout,
        }
    }

    fn cancelled_error(&self) -> RequestError {
        RequestError::Cancelled {
            correlation_id: self.correlation_id.to_string(),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.slot.cancel() {
            self.shared.finish(&self.correlation_id, &self.slot);
            trace!(correlation_id = %self.correlation_id, "Abandoned request cancelled");
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("correlation_id", &self.correlation_id)
            .field("reply_tag", &self.reply_tag)
            .field("timeout", &self.timeout)
            .finish()
    }
}
