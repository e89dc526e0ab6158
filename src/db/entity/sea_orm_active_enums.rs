use sea_orm::entity::prelude::*;

use crate::leaderboard::types::ScoreStatus as DomainScoreStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ScoreStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl From<ScoreStatus> for DomainScoreStatus {
    fn from(value: ScoreStatus) -> Self {
        match value {
            ScoreStatus::Pending => DomainScoreStatus::Pending,
            ScoreStatus::Approved => DomainScoreStatus::Approved,
            ScoreStatus::Rejected => DomainScoreStatus::Rejected,
        }
    }
}

impl From<DomainScoreStatus> for ScoreStatus {
    fn from(value: DomainScoreStatus) -> Self {
        match value {
            DomainScoreStatus::Pending => ScoreStatus::Pending,
            DomainScoreStatus::Approved => ScoreStatus::Approved,
            DomainScoreStatus::Rejected => ScoreStatus::Rejected,
        }
    }
}
