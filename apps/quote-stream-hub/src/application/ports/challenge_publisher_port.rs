//! Challenge Publisher Port (Driven Port)

use crate::domain::quote::ChallengeTick;

/// Port for fanning out featured challenge ticks.
pub trait ChallengePublisher: Send + Sync {
    /// Publish a tick. Must not block.
    fn publish_challenge(&self, tick: &ChallengeTick);
}
