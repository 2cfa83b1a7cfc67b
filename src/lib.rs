/// Tag-scoped event bus: registration, fan-out, tag clearing.
pub mod bus;
/// Settings loading (defaults, TOML file, environment).
pub mod config;
/// Request/reply on top of the bus: router, responder, correlation ids.
pub mod correlation;
/// Message envelope and its JSON wire codec.
pub mod envelope;
/// Logging setup (filters, console formats).
pub mod logging;
/// Transport capability, loopback transport and the transport-to-bus bridge.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Event bus, listeners and bus configuration.
pub use bus::{
    default_bus, BusConfig, BusStats, EventBus, Listener, ListenerId, ListenerResult,
    UnknownTagPolicy,
};
/// Settings of the whole hub.
pub use crate::config::Settings;
/// Correlated request/reply.
pub use correlation::{
    CorrelationRouter, IdStrategy, PendingRequest, Responder, ResponderStats, RouterConfig,
};
/// Envelope and payload types.
pub use envelope::{
    reply_topic, CorrelationId, Envelope, EnvelopeKind, Payload, DEFAULT_REPLY_SEGMENT,
};
/// Logging initialisation.
pub use logging::{init_logging, LogFormat, LoggingConfig};
/// Error taxonomy.
pub use tagbus_error::{
    BoxError, BusError, EnvelopeError, ErrorExt, RequestError, StatusCode, TransportError,
};
/// Transport capability and adapters.
pub use transport::{
    Bridge, BridgeConfig, DeliveryMode, LocalTransport, MessageHandler, SubscriptionHandle, Transport,
};
