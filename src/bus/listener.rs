use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tagbus_error::BoxError;

use crate::Envelope;

/// Результат вызова слушателя.
pub type ListenerResult = Result<(), BoxError>;

type Callback = dyn Fn(&Envelope) -> ListenerResult + Send + Sync;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Идентификатор слушателя. Общий для всех клонов одного [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Слушатель тега.
///
/// Это дешёвый клонируемый хэндл: клоны считаются одним и тем же
/// слушателем, поэтому повторная регистрация клона ничего не меняет, а
/// удаление по клону убирает исходную регистрацию.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<Callback>,
}

impl Listener {
    /// Слушатель, который может завершиться ошибкой.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Envelope) -> ListenerResult + Send + Sync + 'static,
    {
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    /// Слушатель без ошибок.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        Self::new(move |env| {
            callback(env);
            Ok(())
        })
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn call(
        &self,
        envelope: &Envelope,
    ) -> ListenerResult {
        (self.callback)(envelope)
    }
}

impl PartialEq for Listener {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}
