pub mod directory;
pub mod error;
pub mod moderation;
pub mod ranked;
pub mod service;
pub mod storage;
pub mod types;
pub mod validation;

#[cfg(test)]
mod tests;

pub use directory::{GameDirectory, ModeratorAssignments, UserDirectory};
pub use error::LeaderboardError;
pub use moderation::{may_moderate, ModerationAuthority};
pub use ranked::{InMemoryRankedIndex, RankedIndex, RankedIndexError, SharedRankedIndex};
pub use service::{LeaderboardBackend, LeaderboardEngine, LeaderboardService};
pub use storage::{
    InMemoryLeaderboardStore, ScoreStorage, ScoreStorageTxn, SeaOrmLeaderboardStore,
};
pub use types::*;
