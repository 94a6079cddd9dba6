pub mod publisher;

pub use publisher::{BroadcastEvent, EventHub, PublishedEvent};
