//! Live push of pipeline events to connected clients

pub mod broadcaster;
pub mod registry;
pub mod ws;

pub use broadcaster::FanoutBroadcaster;
pub use registry::{Subscriber, SubscriberId, SubscriberRegistry, SubscriberSender, DEFAULT_BUFFER};
pub use ws::ws_handler;
