use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use querylink_bridge::QueryBridge;
use querylink_core::config::AppConfig;
use querylink_gateway::{AppState, DirectQueryResponder, GatewayServer};

#[derive(Parser)]
#[command(name = "querylink", version, about = "Run SQL in the browser from server-side code")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "querylink.toml", env = "QUERYLINK_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve {
        /// Override the bind address from config
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("querylink=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "querylink", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Serve { bind }) => serve(config, bind).await,
        None => serve(config, None).await,
        Some(Commands::Completions { .. }) => Ok(()),
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        let config = AppConfig::load(path)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

async fn serve(mut config: AppConfig, bind: Option<String>) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.gateway.bind = bind;
    }

    let bridge = Arc::new(QueryBridge::new(config.bridge.clone())?);
    let state = Arc::new(AppState::new(bridge.clone(), Arc::new(DirectQueryResponder)));
    let server = GatewayServer::new(config.gateway.clone(), state);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal.cancel();
        }
    });

    info!(
        timeout_secs = config.bridge.query_timeout_secs,
        "Query bridge ready"
    );
    let result = server.run(shutdown).await;

    let drained = bridge.drain_all("server shutting down");
    if drained > 0 {
        warn!(drained, "Failed in-flight queries at shutdown");
    }

    if let Err(e) = &result {
        error!(error = %e, "Gateway exited with error");
    }
    result
}
