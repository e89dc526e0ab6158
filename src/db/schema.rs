//! Creates the leaderboard tables straight from the entity definitions. Used
//! for local runs and tests; deployed databases are managed by migrations.

use sea_orm::sea_query::Index;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Schema, Set,
};
use tracing::info;

use super::entity::{game_moderators, games, roles, scores, user_roles, users};
use crate::leaderboard::types::Role;

const LOG_TARGET: &str = "leaderboard::db::schema";

pub async fn create_schema(conn: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables = vec![
        schema.create_table_from_entity(users::Entity),
        schema.create_table_from_entity(roles::Entity),
        schema.create_table_from_entity(user_roles::Entity),
        schema.create_table_from_entity(games::Entity),
        schema.create_table_from_entity(scores::Entity),
        schema.create_table_from_entity(game_moderators::Entity),
    ];
    for table in tables.iter_mut() {
        conn.execute(backend.build(table.if_not_exists())).await?;
    }

    let indexes = [
        Index::create()
            .name("ux_game_moderators_game_user")
            .table(game_moderators::Entity)
            .col(game_moderators::Column::GameId)
            .col(game_moderators::Column::UserId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ix_scores_game_status")
            .table(scores::Entity)
            .col(scores::Column::GameId)
            .col(scores::Column::Status)
            .if_not_exists()
            .to_owned(),
    ];
    for index in &indexes {
        conn.execute(backend.build(index)).await?;
    }

    ensure_roles(conn).await?;
    info!(target: LOG_TARGET, backend = ?backend, "leaderboard schema ready");
    Ok(())
}

async fn ensure_roles(conn: &DatabaseConnection) -> Result<(), DbErr> {
    for role in [Role::Admin, Role::Moderator] {
        let existing = roles::Entity::find()
            .filter(roles::Column::Name.eq(role.as_str()))
            .one(conn)
            .await?;
        if existing.is_none() {
            roles::ActiveModel {
                name: Set(role.as_str().to_owned()),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}
