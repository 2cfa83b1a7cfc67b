use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, TrySendError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tagbus_error::{BusError, ErrorExt, LogLevel, TransportError};
use tracing::{debug, error, info, warn};

use super::{MessageHandler, SubscriptionHandle, Transport};
use crate::{envelope, Envelope, EventBus};

const WORKER_THREAD_NAME: &str = "tagbus-dispatch";
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Где выполняется рассылка входящих сообщений.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// В потоке транспорта, внутри обработчика.
    #[default]
    Inline,
    /// В отдельном потоке рассылки. Поток транспорта только ставит конверт
    /// в очередь.
    Worker,
}

/// Настройки моста.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mode: DeliveryMode,
    /// Ёмкость очереди потока рассылки в режиме `Worker` (не меньше 1).
    /// Кадр, пришедший в полную очередь, отбрасывается и учитывается в
    /// [`Bridge::dropped_frames`]; поток транспорта не блокируется.
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

enum WorkerMessage {
    Deliver { tag: String, envelope: Envelope },
    Shutdown,
}

struct Worker {
    tx: mpsc::SyncSender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

/// Мост из транспорта в шину.
///
/// Подписывается на фильтр транспорта, декодирует входящие кадры и
/// рассылает их через [`EventBus::send`] с топиком кадра в качестве тега.
/// Недекодируемые кадры и ошибки слушателей пишутся в лог и отбрасываются.
///
/// При `Drop` подписка снимается, а поток рассылки (если есть)
/// дорабатывает очередь и завершается.
pub struct Bridge {
    transport: Arc<dyn Transport>,
    handle: SubscriptionHandle,
    worker: Option<Worker>,
    dropped: Arc<AtomicU64>,
}

impl Bridge {
    /// Подключает мост с ёмкостью очереди по умолчанию.
    pub fn attach(
        bus: Arc<EventBus>,
        transport: Arc<dyn Transport>,
        filter: &str,
        mode: DeliveryMode,
    ) -> Result<Self, TransportError> {
        Self::attach_with_config(
            bus,
            transport,
            filter,
            BridgeConfig {
                mode,
                ..BridgeConfig::default()
            },
        )
    }

    pub fn attach_with_config(
        bus: Arc<EventBus>,
        transport: Arc<dyn Transport>,
        filter: &str,
        config: BridgeConfig,
    ) -> Result<Self, TransportError> {
        let mode = config.mode;
        let dropped = Arc::new(AtomicU64::new(0));
        let (handler, worker) = match mode {
            DeliveryMode::Inline => {
                let handler: MessageHandler = Arc::new(move |topic: &str, frame: Bytes| {
                    if let Some(envelope) = decode_frame(topic, &frame) {
                        deliver(&bus, topic, &envelope);
                    }
                });
                (handler, None)
            }
            DeliveryMode::Worker => {
                let (tx, rx) = mpsc::sync_channel::<WorkerMessage>(config.queue_capacity.max(1));
                let thread = thread::Builder::new()
                    .name(WORKER_THREAD_NAME.to_string())
                    .spawn(move || run_worker(bus, rx))
                    .map_err(|e| TransportError::SubscribeFailed {
                        filter: filter.to_string(),
                        reason: format!("cannot spawn dispatch thread: {e}"),
                    })?;

                let queue = tx.clone();
                let overflow = dropped.clone();
                let handler: MessageHandler = Arc::new(move |topic: &str, frame: Bytes| {
                    let Some(envelope) = decode_frame(topic, &frame) else {
                        return;
                    };
                    let msg = WorkerMessage::Deliver {
                        tag: topic.to_string(),
                        envelope,
                    };
                    match queue.try_send(msg) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            let total = overflow.fetch_add(1, Ordering::Relaxed) + 1;
                            warn!(topic, dropped = total, "Dispatch queue full, frame dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!(topic, "Dispatch thread is gone, frame dropped");
                        }
                    }
                });
                let worker = Worker {
                    tx,
                    thread: Some(thread),
                };
                (handler, Some(worker))
            }
        };

        let handle = match transport.subscribe(filter, handler) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(worker) = worker {
                    worker.stop();
                }
                return Err(e);
            }
        };
        info!(subscription = %handle, ?mode, queue_capacity = config.queue_capacity, "Bridge attached");

        Ok(Self {
            transport,
            handle,
            worker,
            dropped,
        })
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn mode(&self) -> DeliveryMode {
        if self.worker.is_some() {
            DeliveryMode::Worker
        } else {
            DeliveryMode::Inline
        }
    }

    /// Кадры, отброшенные из-за полной очереди рассылки.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Err(e) = self.transport.unsubscribe(&self.handle) {
            debug!(subscription = %self.handle, error = %e, "Bridge unsubscribe failed");
        }
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        debug!(subscription = %self.handle, "Bridge detached");
    }
}

impl Worker {
    fn stop(mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // из самого потока рассылки ждать себя нельзя: ни места в очереди,
        // ни завершения
        if thread.thread().id() == thread::current().id() {
            let _ = self.tx.try_send(WorkerMessage::Shutdown);
            return;
        }
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if thread.join().is_err() {
            error!("Dispatch thread panicked");
        }
    }
}

fn run_worker(
    bus: Arc<EventBus>,
    rx: mpsc::Receiver<WorkerMessage>,
) {
    debug!("Dispatch thread started");
    while let Ok(msg) = rx.recv() {
        match msg {
            WorkerMessage::Deliver { tag, envelope } => deliver(&bus, &tag, &envelope),
            WorkerMessage::Shutdown => break,
        }
    }
    debug!("Dispatch thread stopped");
}

fn decode_frame(
    topic: &str,
    frame: &[u8],
) -> Option<Envelope> {
    match envelope::decode(frame) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(topic, len = frame.len(), error = %e, "Dropping undecodable frame");
            None
        }
    }
}

fn deliver(
    bus: &EventBus,
    tag: &str,
    envelope: &Envelope,
) {
    if let Err(e) = bus.send(tag, envelope) {
        report(tag, &e);
    }
}

fn report(
    tag: &str,
    err: &BusError,
) {
    match err.log_level() {
        LogLevel::Debug => debug!(tag, error = %err, "Inbound dispatch failed"),
        LogLevel::Info => info!(tag, error = %err, "Inbound dispatch failed"),
        LogLevel::Warn => warn!(tag, error = %err, "Inbound dispatch failed"),
        LogLevel::Error => error!(tag, error = %err, "Inbound dispatch failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{transport::LocalTransport, Listener};

    fn setup() -> (Arc<EventBus>, Arc<LocalTransport>) {
        (Arc::new(EventBus::new()), Arc::new(LocalTransport::new()))
    }

    fn publish(
        transport: &LocalTransport,
        env: &Envelope,
    ) {
        transport
            .publish(&env.topic, envelope::encode(env).unwrap())
            .unwrap();
    }

    #[test]
    fn test_inline_delivery_runs_on_publisher_thread() {
        let (bus, transport) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.add_listen(
            "sensors/temp",
            Listener::from_fn(move |env| {
                s.lock()
                    .unwrap()
                    .push((thread::current().id(), env.payload.clone()));
            }),
        )
        .unwrap();

        let _bridge = Bridge::attach(
            bus.clone(),
            transport.clone(),
            "sensors/*",
            DeliveryMode::Inline,
        )
        .unwrap();
        publish(&transport, &Envelope::event("sensors/temp", "21.5"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, thread::current().id());
        assert_eq!(seen[0].1.as_text(), Some("21.5"));
    }

    /// Тест проверяет, что в режиме `Worker` слушатели вызываются в потоке
    /// рассылки, а не в потоке публикации.
    #[test]
    fn test_worker_delivery_runs_off_publisher_thread() {
        let (bus, transport) = setup();
        let names = Arc::new(Mutex::new(Vec::new()));
        let n = names.clone();
        bus.add_listen(
            "jobs",
            Listener::from_fn(move |_| {
                n.lock()
                    .unwrap()
                    .push(thread::current().name().map(str::to_string));
            }),
        )
        .unwrap();

        let bridge =
            Bridge::attach(bus.clone(), transport.clone(), "jobs", DeliveryMode::Worker).unwrap();
        assert_eq!(bridge.mode(), DeliveryMode::Worker);
        for _ in 0..3 {
            publish(&transport, &Envelope::event("jobs", "run"));
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while names.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let names = names.lock().unwrap();
        assert_eq!(names.len(), 3);
        assert!(names
            .iter()
            .all(|n| n.as_deref() == Some(WORKER_THREAD_NAME)));
    }

    #[test]
    fn test_garbage_frames_and_failures_are_dropped() {
        let (bus, transport) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.add_listen("t", Listener::new(|_| Err("boom".into())))
            .unwrap();
        bus.add_listen(
            "t",
            Listener::from_fn(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let _bridge =
            Bridge::attach(bus.clone(), transport.clone(), "t", DeliveryMode::Inline).unwrap();
        transport
            .publish("t", Bytes::from_static(b"not json"))
            .unwrap();
        publish(&transport, &Envelope::event("t", "x"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().listener_failures, 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (bus, transport) = setup();
        let bridge =
            Bridge::attach(bus.clone(), transport.clone(), "**", DeliveryMode::Worker).unwrap();
        assert_eq!(transport.subscription_count(), 1);
        assert_eq!(bridge.subscription().filter(), "**");

        drop(bridge);
        assert_eq!(transport.subscription_count(), 0);
    }

    /// Тест проверяет, что при занятом слушателе очередь не растёт сверх
    /// ёмкости: лишние кадры отбрасываются и считаются, поток публикации не
    /// блокируется.
    #[test]
    fn test_full_queue_drops_frames() {
        let (bus, transport) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let h = hits.clone();
        bus.add_listen(
            "jobs",
            Listener::from_fn(move |_| {
                if h.fetch_add(1, Ordering::SeqCst) == 0 {
                    entered_tx.lock().unwrap().send(()).unwrap();
                    release_rx
                        .lock()
                        .unwrap()
                        .recv_timeout(Duration::from_secs(5))
                        .unwrap();
                }
            }),
        )
        .unwrap();

        let bridge = Bridge::attach_with_config(
            bus.clone(),
            transport.clone(),
            "jobs",
            BridgeConfig {
                mode: DeliveryMode::Worker,
                queue_capacity: 2,
            },
        )
        .unwrap();

        publish(&transport, &Envelope::event("jobs", "first"));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        for _ in 0..5 {
            publish(&transport, &Envelope::event("jobs", "more"));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(bridge.dropped_frames(), 3);

        release_tx.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while hits.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(bridge.dropped_frames(), 3);
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.mode, DeliveryMode::Inline);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let (bus, transport) = setup();
        let res = Bridge::attach(bus, transport, "a/[", DeliveryMode::Worker);
        assert!(matches!(res, Err(TransportError::InvalidFilter { .. })));
    }
}
