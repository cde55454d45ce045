//! Application Services
//!
//! - `SubscriptionCoordinator`: visibility signals to priorities and topics
//! - `IngestRouter`: decoded upstream traffic to the caches

mod coordinator;
mod ingest;

pub use coordinator::{Recomputed, SubscriptionCoordinator};
pub use ingest::IngestRouter;
