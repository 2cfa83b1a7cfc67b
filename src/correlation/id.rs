use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CorrelationId;

/// Счётчик общий для процесса, чтобы два роутера не выдали один номер.
static NEXT_COUNTER_ID: AtomicU64 = AtomicU64::new(1);

/// Способ генерации идентификаторов корреляции.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Случайный UUID v4.
    #[default]
    Uuid,
    /// Монотонно растущий счётчик, уникальный в пределах процесса.
    Counter,
}

impl IdStrategy {
    pub fn next_id(&self) -> CorrelationId {
        match self {
            Self::Uuid => CorrelationId::new(Uuid::new_v4().simple().to_string()),
            Self::Counter => {
                let n = NEXT_COUNTER_ID.fetch_add(1, Ordering::Relaxed);
                CorrelationId::new(format!("{n:016x}"))
            }
        }
    }
}
