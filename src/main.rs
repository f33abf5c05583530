use anyhow::Result;
use clap::Parser;
use tracing::info;

use sqlgate::backend::postgres::PgConnector;
use sqlgate::config::{AppConfig, DbKind};
use sqlgate::engine::mysql::MySqlEngine;
use sqlgate::engine::postgres::PostgresEngine;
use sqlgate::state::GatewayState;
use sqlgate::{server, telemetry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "gateway.yaml")]
    config: String,

    /// Listen port, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Client-facing protocol, overriding the configuration
    #[arg(long, value_enum)]
    db_type: Option<DbKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config)?;
    if let Some(port) = args.port {
        config.proxy_port = Some(port);
    }
    if let Some(kind) = args.db_type {
        config.proxy_db_type = kind;
    }

    info!(
        protocol = %config.proxy_db_type,
        port = config.listen_port(),
        target = %format!(
            "{}:{}/{}",
            config.target.host, config.target.port, config.target.database
        ),
        "starting gateway"
    );

    let state = GatewayState::new();
    let shutdown = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.begin_shutdown();
        }
    });

    match config.proxy_db_type {
        DbKind::MySql => server::run(MySqlEngine, PgConnector, config, state).await,
        DbKind::Postgres => server::run(PostgresEngine, PgConnector, config, state).await,
    }
}
