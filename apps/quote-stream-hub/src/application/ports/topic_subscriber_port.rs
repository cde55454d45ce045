//! Topic Subscriber Port (Driven Port)
//!
//! Registers interest in upstream topics. Registration is remembered across
//! reconnects, so callers never re-subscribe after a connection drop.

use crate::domain::topic::Topic;

/// Port for registering upstream topic subscriptions.
#[cfg_attr(test, mockall::automock)]
pub trait TopicSubscriber: Send + Sync {
    /// Register a topic. Idempotent; a second call for the same topic is a no-op.
    ///
    /// When the connection is down the topic is recorded and sent once the
    /// session is (re-)established.
    fn subscribe(&self, topic: &Topic);

    /// Drop a topic registration. Unknown topics are ignored.
    fn unsubscribe(&self, topic: &Topic);

    /// Whether the topic is registered.
    fn is_subscribed(&self, topic: &Topic) -> bool;
}
