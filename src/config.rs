use serde::Deserialize;

pub const DEFAULT_LEADERBOARD_LIMIT: u64 = 10;
pub const MAX_LEADERBOARD_LIMIT: u64 = 100;
pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Tunables for the leaderboard engine.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub default_leaderboard_limit: u64,
    pub max_leaderboard_limit: u64,
    pub default_page_size: u64,
    pub max_page_size: u64,
    /// Serialise concurrent rebuilds of the same game's ranked index.
    pub single_flight_rebuild: bool,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            default_leaderboard_limit: DEFAULT_LEADERBOARD_LIMIT,
            max_leaderboard_limit: MAX_LEADERBOARD_LIMIT,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            single_flight_rebuild: true,
        }
    }
}
