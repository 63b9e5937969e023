//! Core functionality of the session hub

pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod message;
pub mod rate_limiter;
pub mod registry;
pub mod room;

// Re-export main components for convenience
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use hub::{Collaborators, Hub, HubOptions, HubStatus, SharedHub};
pub use message::{Envelope, MessageType};
pub use rate_limiter::RateLimiter;
pub use registry::{create_registry, ConnectionRegistry, SharedRegistry};
pub use room::{RoomRouter, SharedRoomRouter};
