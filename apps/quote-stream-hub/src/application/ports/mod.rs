//! Application Ports (Driver and Driven)
//!
//! - **Driven**: [`TopicSubscriber`] registers upstream topics,
//!   [`InstrumentDirectory`] lists known instruments,
//!   [`ChallengePublisher`] fans out challenge ticks.
//! - **Driver**: [`InboundSink`] receives decoded upstream messages and
//!   connection state transitions.

mod challenge_publisher_port;
mod inbound_port;
mod instrument_directory_port;
mod topic_subscriber_port;

pub use challenge_publisher_port::ChallengePublisher;
pub use inbound_port::{CandleUpdate, InboundMessage, InboundSink};
pub use instrument_directory_port::{DirectoryError, InstrumentDirectory, StaticInstrumentDirectory};
#[cfg(test)]
pub use topic_subscriber_port::MockTopicSubscriber;
pub use topic_subscriber_port::TopicSubscriber;
