use clap::Parser;
use gateway::config::GatewayConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    info!("gateway starting");

    let config = GatewayConfig::parse();
    gateway::serve(config).await
}
