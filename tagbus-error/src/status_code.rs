use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок шины.
///
/// # Диапазоны:
/// - 1xxx: Внутренние ошибки
/// - 2xxx: Ошибки маршрутизации (теги, идентификаторы корреляции)
/// - 3xxx: Ошибки доставки слушателям
/// - 4xxx: Сроки ожидания и отмена
/// - 5xxx: Сериализация конвертов
/// - 6xxx: Транспорт
///
/// `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`,
/// что удобно, когда код передаётся по проводу вместе с ответом.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: Внутренние ошибки ===
    /// Код по умолчанию для ошибок без собственного кода
    /// (см. [`ErrorExt::status_code`](crate::ErrorExt::status_code)).
    Internal = 1000,

    // === 2xxx: Маршрутизация ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidTag = 2002,
    InvalidTopic = 2003,
    UnexpectedKind = 2004,
    CorrelationMismatch = 2005,

    // === 3xxx: Доставка ===
    ListenerFailed = 3000,
    ListenerPanicked = 3001,

    // === 4xxx: Сроки и отмена ===
    Timeout = 4000,
    Cancelled = 4001,

    // === 5xxx: Сериализация ===
    SerializationFailed = 5000,
    DeserializationFailed = 5001,

    // === 6xxx: Транспорт ===
    NotConnected = 6000,
    PublishFailed = 6001,
    SubscribeFailed = 6002,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Возвращает `None`, если значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    ///
    /// Повтор запроса после таймаута выполняется с новым идентификатором
    /// корреляции; сама шина повторов не делает.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NotConnected | Self::PublishFailed
        )
    }

    /// Ошибка вызывающей стороны: неверный тег, топик или конверт.
    pub fn is_client_error(&self) -> bool {
        (2000..=2999).contains(&self.code())
    }

    /// Ошибка, возникшая в транспорте (диапазон 6xxx).
    pub fn is_transport_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::NotFound | Self::Cancelled => LogLevel::Debug,
            Self::InvalidTag
            | Self::InvalidTopic
            | Self::UnexpectedKind
            | Self::CorrelationMismatch
            | Self::AlreadyExists => LogLevel::Info,
            Self::Timeout | Self::ListenerFailed => LogLevel::Warn,
            Self::Internal | Self::ListenerPanicked => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
