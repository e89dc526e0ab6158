pub mod config;
pub mod db;
pub mod leaderboard;
pub mod server;

pub use config::LeaderboardConfig;
