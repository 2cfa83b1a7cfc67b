pub mod bus;
pub mod envelope;
pub mod request;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей.
pub use bus::*;
pub use envelope::*;
pub use request::*;
pub use transport::*;
