use anyhow::Result;
use clap::Parser;
use sessionguard::config::Config;
use sessionguard::server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Session token and rate-limit service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Address to bind, overrides BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Rate-limit rules JSON file, overrides RATE_LIMIT_RULES_FILE
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Log level, overrides LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration from environment
    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(rules) = cli.rules {
        config.rate_limit_rules_file = Some(rules);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("sessionguard={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sessionguard");
    tracing::info!(
        "Configuration: bind_addr={}, environment={}, admin_login_enabled={}",
        config.bind_addr,
        config.environment,
        config.admin_password.is_some()
    );

    // Create and run the server
    let server =
        Server::new(config).map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
