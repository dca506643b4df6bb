use clap::Parser;
use signal_relay::config::{DEFAULT_HOST, DEFAULT_SIGNALING_PORT, RelayConfig};
use signal_relay::signaling::SignalingServer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "signal-relay")]
#[command(about = "WebRTC signaling relay")]
struct Cli {
    /// Address to bind
    #[arg(long, env = "SIGNAL_RELAY_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "SIGNAL_RELAY_PORT", default_value_t = DEFAULT_SIGNALING_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = RelayConfig {
        host: cli.host,
        port: cli.port,
        ..RelayConfig::default()
    };

    println!("   Signal Relay");
    println!("   Binding to {}", config.bind_addr());
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(config).await?;
    server.run_until(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received");
}
