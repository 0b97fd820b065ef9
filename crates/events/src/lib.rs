//! Session lifecycle events: the publishing contract and in-process fan-out.

pub mod broadcaster;
pub mod publisher;

pub use broadcaster::{StatusBroadcaster, Subscription};
pub use publisher::{
    FanOutPublisher, LoggingStatusPublisher, PublishError, StatusPublisher, publish_best_effort,
};
