use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

pub mod entity;
pub mod schema;

pub async fn connect_to(database_url: &str) -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(database_url.to_owned());
    opts.max_connections(5)
        .min_connections(1)
        .sqlx_logging(true);
    Database::connect(opts)
        .await
        .with_context(|| format!("failed to connect to database at {}", database_url))
}
