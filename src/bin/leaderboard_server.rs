use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use leaderboard::config::{
    LeaderboardConfig, DEFAULT_LEADERBOARD_LIMIT, DEFAULT_PAGE_SIZE, MAX_LEADERBOARD_LIMIT,
    MAX_PAGE_SIZE,
};
use leaderboard::server::{run_server, ServerConfig};

const DEFAULT_BIND: &str = "127.0.0.1:4000";

#[derive(Debug, Parser)]
#[command(name = "leaderboard_server")]
#[command(about = "Launch the game leaderboard API server", long_about = None)]
struct Args {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "SERVER_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// SeaORM-compatible Postgres (or SQLite) URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "SERVER_LOG_JSON", default_value_t = false)]
    json: bool,

    /// Create missing tables and seed roles before serving
    #[arg(long, env = "SERVER_INIT_SCHEMA", default_value_t = false)]
    init_schema: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "SERVER_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "LEADERBOARD_DEFAULT_LIMIT", default_value_t = DEFAULT_LEADERBOARD_LIMIT)]
    default_leaderboard_limit: u64,

    #[arg(long, env = "LEADERBOARD_MAX_LIMIT", default_value_t = MAX_LEADERBOARD_LIMIT)]
    max_leaderboard_limit: u64,

    #[arg(long, env = "LEADERBOARD_DEFAULT_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    default_page_size: u64,

    #[arg(long, env = "LEADERBOARD_MAX_PAGE_SIZE", default_value_t = MAX_PAGE_SIZE)]
    max_page_size: u64,

    /// Let concurrent cold reads of one game each rebuild its ranked index
    #[arg(long, env = "LEADERBOARD_DISABLE_SINGLE_FLIGHT", default_value_t = false)]
    disable_single_flight: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;
    let config = build_config(args).context("failed to build server config")?;
    run_server(config).await
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

fn build_config(args: Args) -> Result<ServerConfig> {
    if args.max_leaderboard_limit == 0 || args.max_page_size == 0 {
        return Err(anyhow!("maximum limits must be greater than zero"));
    }
    if args.request_timeout_secs == 0 {
        return Err(anyhow!("request timeout must be greater than zero"));
    }

    let leaderboard = LeaderboardConfig {
        default_leaderboard_limit: args.default_leaderboard_limit,
        max_leaderboard_limit: args.max_leaderboard_limit,
        default_page_size: args.default_page_size,
        max_page_size: args.max_page_size,
        single_flight_rebuild: !args.disable_single_flight,
    };

    Ok(ServerConfig {
        bind: args.bind,
        database_url: args.database_url,
        init_schema: args.init_schema,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        leaderboard,
    })
}
