use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use bytes::Bytes;
use tagbus_error::{BoxError, TransportError};
use tracing::{debug, info, warn};

use crate::{
    envelope,
    transport::{MessageHandler, SubscriptionHandle, Transport},
    Envelope, Payload,
};

#[derive(Debug, Default)]
struct ResponderMetrics {
    handled: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
}

/// Счётчики ответчика.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderStats {
    /// Запросов, на которые ушёл ответ.
    pub handled: u64,
    /// Запросов, обработчик или отправка ответа которых завершились ошибкой.
    pub failed: u64,
    /// Кадров, не являющихся запросами.
    pub ignored: u64,
}

/// Серверная сторона запросов: отвечает на запросы, пришедшие по
/// фильтру транспорта.
///
/// Обработчик получает конверт запроса и возвращает нагрузку ответа.
/// Ответ уходит в топик `reply_to` запроса с его идентификатором
/// корреляции. Если обработчик вернул ошибку, ответа нет, и вызывающий
/// получит таймаут.
///
/// При `Drop` подписка снимается.
pub struct Responder {
    transport: Arc<dyn Transport>,
    handle: SubscriptionHandle,
    metrics: Arc<ResponderMetrics>,
}

impl Responder {
    pub fn bind<F>(
        transport: Arc<dyn Transport>,
        filter: &str,
        handler: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(&Envelope) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        let metrics = Arc::new(ResponderMetrics::default());
        let on_message: MessageHandler = {
            let transport = Arc::downgrade(&transport);
            let metrics = metrics.clone();
            Arc::new(move |topic: &str, frame: Bytes| {
                respond(&transport, &metrics, &handler, topic, &frame);
            })
        };

        let handle = transport.subscribe(filter, on_message)?;
        info!(subscription = %handle, "Responder bound");
        Ok(Self {
            transport,
            handle,
            metrics,
        })
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn stats(&self) -> ResponderStats {
        ResponderStats {
            handled: self.metrics.handled.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            ignored: self.metrics.ignored.load(Ordering::Relaxed),
        }
    }
}

fn respond<F>(
    transport: &Weak<dyn Transport>,
    metrics: &ResponderMetrics,
    handler: &F,
    topic: &str,
    frame: &[u8],
) where
    F: Fn(&Envelope) -> Result<Payload, BoxError>,
{
    let request = match envelope::decode(frame) {
        Ok(env) if env.is_request() => env,
        Ok(env) => {
            metrics.ignored.fetch_add(1, Ordering::Relaxed);
            debug!(topic, kind = %env.kind, "Responder ignored non-request envelope");
            return;
        }
        Err(e) => {
            metrics.ignored.fetch_add(1, Ordering::Relaxed);
            warn!(topic, error = %e, "Responder dropped undecodable frame");
            return;
        }
    };

    let result = handler(&request)
        .and_then(|payload| Ok(request.reply_to_request(payload)?))
        .and_then(|reply| Ok((envelope::encode(&reply)?, reply.topic)));
    let (frame, reply_topic) = match result {
        Ok(out) => out,
        Err(e) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            warn!(topic, correlation_id = ?request.correlation_id, error = %e, "Request handler failed");
            return;
        }
    };

    let Some(transport) = transport.upgrade() else {
        return;
    };
    match transport.publish(&reply_topic, frame) {
        Ok(()) => {
            metrics.handled.fetch_add(1, Ordering::Relaxed);
            debug!(topic, reply_topic = %reply_topic, "Reply sent");
        }
        Err(e) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            warn!(topic, reply_topic = %reply_topic, error = %e, "Reply publish failed");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Err(e) = self.transport.unsubscribe(&self.handle) {
            debug!(subscription = %self.handle, error = %e, "Responder unsubscribe failed");
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Responder")
            .field("subscription", &self.handle)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{transport::LocalTransport, CorrelationId, EnvelopeKind};

    fn capture_replies(transport: &LocalTransport) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        transport
            .subscribe(
                "**/reply-to/*",
                Arc::new(move |_: &str, frame: Bytes| {
                    s.lock().unwrap().push(envelope::decode(&frame).unwrap());
                }),
            )
            .unwrap();
        seen
    }

    fn send(
        transport: &LocalTransport,
        env: &Envelope,
    ) {
        transport
            .publish(&env.topic, envelope::encode(env).unwrap())
            .unwrap();
    }

    #[test]
    fn test_replies_on_reply_to_topic() {
        let transport = Arc::new(LocalTransport::new());
        let replies = capture_replies(&transport);
        let responder = Responder::bind(transport.clone(), "svc/upper", |req| {
            let text = req.payload.as_text().unwrap_or_default();
            Ok(Payload::from(text.to_uppercase()))
        })
        .unwrap();

        let cid = CorrelationId::from("c-1");
        send(
            &transport,
            &Envelope::request("svc/upper", cid.clone(), "svc/upper/reply-to/c-1", "abc"),
        );

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, EnvelopeKind::Reply);
        assert_eq!(replies[0].topic, "svc/upper/reply-to/c-1");
        assert_eq!(replies[0].correlation_id, Some(cid));
        assert_eq!(replies[0].payload.as_text(), Some("ABC"));
        assert_eq!(responder.stats().handled, 1);
    }

    #[test]
    fn test_ignores_events_and_counts_failures() {
        let transport = Arc::new(LocalTransport::new());
        let replies = capture_replies(&transport);
        let responder =
            Responder::bind(transport.clone(), "svc/*", |_| Err("handler failed".into())).unwrap();

        send(&transport, &Envelope::event("svc/a", "x"));
        transport
            .publish("svc/a", Bytes::from_static(b"{"))
            .unwrap();
        send(
            &transport,
            &Envelope::request("svc/a", CorrelationId::from("c"), "svc/a/reply-to/c", "x"),
        );

        assert!(replies.lock().unwrap().is_empty());
        assert_eq!(
            responder.stats(),
            ResponderStats {
                handled: 0,
                failed: 1,
                ignored: 2,
            }
        );
    }

    #[test]
    fn test_drop_unsubscribes() {
        let transport = Arc::new(LocalTransport::new());
        let responder = Responder::bind(transport.clone(), "svc", |_| Ok("ok".into())).unwrap();
        assert_eq!(transport.subscription_count(), 1);
        drop(responder);
        assert_eq!(transport.subscription_count(), 0);
    }
}
