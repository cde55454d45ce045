//! Application Layer - Subscription policy and inbound routing.
//!
//! Services here decide which instruments are HOT or WARM, which topics must
//! be subscribed, and where each decoded upstream message lands. They talk to
//! the transport and the consumers only through the ports.

/// Port interfaces for the upstream session and the instrument directory.
pub mod ports;

/// Subscription coordination and inbound message routing.
pub mod services;
