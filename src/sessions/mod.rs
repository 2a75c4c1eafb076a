//! Connection registry for relay sessions
//!
//! The controller and every dashboard hold one WebSocket session each. The
//! registry keeps their send handles by role so telemetry can be fanned out
//! to clients and commands routed to the controller.

pub mod registry;
pub mod relay;
pub mod types;

pub use registry::{ConnectionRegistry, DEFAULT_SEND_TIMEOUT, Delivery, RegistrySnapshot, SharedRegistry};
pub use relay::{CONTROLLER_CONNECTED, CONTROLLER_DISCONNECTED, ack, notify_clients, relay};
pub use types::{ClientPolicy, Role, SendError, SessionHandle};
