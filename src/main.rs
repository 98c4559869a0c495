use anyhow::Result;
use clap::Parser;
use sheetguard::config::Config;
use sheetguard::server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line overrides; anything not given comes from the environment.
#[derive(Debug, Parser)]
#[command(name = "sheetguard", version, about = "Resilient gateway for spreadsheet writes")]
struct Args {
    /// Address to listen on
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Directory for the audit log and its archives
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory for the emulated sheets
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let args = Args::parse();

    // Load configuration from environment
    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    args.apply(&mut config);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("sheetguard={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sheetguard service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        log_dir = %config.log_dir.display(),
        data_dir = %config.data_dir.display(),
        failure_threshold = config.failure_threshold,
        retry_attempts = config.retry_attempts,
        rate_limit_enabled = config.rate_limit_enabled,
        "Configuration loaded"
    );

    // Create and run the server
    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
