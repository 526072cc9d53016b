use anyhow::Result;
use clap::Parser;
use ibp_geodns::{load_config, App, Config};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ibp-geodns",
    version,
    about = "Geo-steered, health-aware PowerDNS backend"
)]
struct Cli {
    /// Path to config file (json|yaml). Falls back to $CONFIG_PATH or ./config/config.json
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logging(cfg: &Config) {
    let env_filter = if let Some(level) = &cfg.log_level {
        EnvFilter::new(level)
    } else if let Ok(level) = std::env::var("RUST_LOG") {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("info")
    };
    if cfg.json_logging {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global subscriber");
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to set global subscriber");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./config/config.json"));

    let cfg: Config = load_config(&config_path)?;
    init_logging(&cfg);
    info!(?config_path, server = %cfg.server_name, "loaded configuration");

    let app = App::new(cfg)?;
    app.run().await
}
