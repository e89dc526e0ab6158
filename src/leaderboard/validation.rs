use chrono::{DateTime, Utc};

use super::error::LeaderboardError;
use super::types::{Page, ScoreValue};

/// A new submission must strictly beat the best approved value for the same
/// (user, game). The first submission always passes.
pub fn ensure_exceeds_best(
    value: ScoreValue,
    best_approved: Option<ScoreValue>,
) -> Result<(), LeaderboardError> {
    match best_approved {
        Some(best) if value <= best => Err(LeaderboardError::validation(format!(
            "score {value} must exceed current best approved score {best}"
        ))),
        _ => Ok(()),
    }
}

pub fn ensure_date_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), LeaderboardError> {
    if start > end {
        return Err(LeaderboardError::validation(
            "start date cannot be after end date",
        ));
    }
    Ok(())
}

/// Resolves a requested limit against a default and an upper bound.
pub fn resolve_limit(
    requested: Option<u64>,
    default: u64,
    max: u64,
) -> Result<u64, LeaderboardError> {
    match requested {
        Some(0) => Err(LeaderboardError::validation(
            "limit must be greater than zero",
        )),
        Some(limit) => Ok(limit.min(max)),
        None => Ok(default.min(max)),
    }
}

pub fn resolve_page(
    limit: Option<u64>,
    offset: Option<u64>,
    default: u64,
    max: u64,
) -> Result<Page, LeaderboardError> {
    Ok(Page::new(
        resolve_limit(limit, default, max)?,
        offset.unwrap_or(0),
    ))
}

/// Title defaults to "<game name> - <value>" when missing or blank.
pub fn resolve_title(title: Option<String>, game_name: &str, value: ScoreValue) -> String {
    match title.map(|t| t.trim().to_owned()) {
        Some(t) if !t.is_empty() => t,
        _ => format!("{game_name} - {value}"),
    }
}

pub fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty())
}
