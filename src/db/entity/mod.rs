pub mod game_moderators;
pub mod games;
pub mod roles;
pub mod scores;
pub mod sea_orm_active_enums;
pub mod user_roles;
pub mod users;
