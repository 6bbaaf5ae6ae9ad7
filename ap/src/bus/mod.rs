//! Message bus: routing, message types and delivery errors

mod error;
mod message;
mod message_bus;

pub use error::{BusError, DeliveryError};
pub use message::{BROADCAST, COORDINATOR, Message, MessageMetadata, MessageType, Payload, STATE_MANAGER, WorkKind};
pub use message_bus::{BusEvent, Callback, DEFAULT_DELIVERY_TIMEOUT_MS, DeliveryResult, MessageBus, Subscription};
