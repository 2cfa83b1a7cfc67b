pub mod ext;
pub mod status_code;
pub mod types;

// Публичный экспорт всех типов ошибок и функций из вложенных модулей,
// чтобы упростить доступ к ним из внешнего кода.
pub use ext::*;
pub use status_code::*;
pub use types::*;

/// Ошибка произвольного слушателя или обработчика.
///
/// Слушатели возвращают любые ошибки, пригодные для передачи между потоками;
/// шина сохраняет их без обёртки, чтобы вызывающий мог сделать downcast.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
