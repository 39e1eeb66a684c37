//! Domain layer: command codes, transports, listener events and the
//! subscriber registry.
//!
//! These types are shared by the probe client and the listener.

pub mod command;
pub mod event_bus;
pub mod peer_event;
pub mod subscriber_registry;
pub mod transport;

pub use command::Command;
pub use event_bus::EventBus;
pub use peer_event::PeerEvent;
pub use subscriber_registry::{Subscriber, SubscriberRegistry};
pub use transport::Transport;
