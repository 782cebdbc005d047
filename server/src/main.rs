use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use server::{Services, create_router, telemetry};

#[derive(Debug, Parser)]
#[command(name = "booking-server", version, about = "Multi-tenant booking backend")]
struct Cli {
    /// TOML or YAML configuration file; `RB_*` environment variables override it.
    #[arg(short, long, env = "RB_CONFIG")]
    config: Option<PathBuf>
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    telemetry::init_tracing(&config.observability);
    let metrics = telemetry::init_metrics(&config.observability)?;
    info!(mode = %config.deployment.mode, "Starting booking server");

    let directory = storage::build_directory(&config.database, &config.cache, &config.tenancy).await?;
    let services = Services::start(&config, directory, metrics);
    let app = create_router(services.state);

    let addr = config.server.socket_addr()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
