use clap::Parser;
use sensor_api::server::client_registry::ConnectedClients;
use sensor_api::server::config::ServerConfig;
use sensor_api::server::snapshot_broadcaster::SnapshotBroadcaster;
use sensor_api::simulator::{SensorSimulator, Snapshot};
use sensor_api::version::VERSION;
use sensor_api::web::create_axum_router;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "Industrial sensor simulator with a REST and WebSocket API", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "sensor-api.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Logging needs the configured directory, so configuration errors go to stderr.
    let server_config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&server_config.log_dir);
    info!(version = VERSION, "Starting Industrial Sensor API.");

    // --- Simulator ---
    let simulator = Arc::new(SensorSimulator::new(server_config.simulator_settings()));
    let simulation_handle = simulator.start();

    // --- WebSocket broadcast ---
    let (ws_data_broadcaster_tx, _) = broadcast::channel::<Arc<Snapshot>>(16);
    let broadcaster_handle = SnapshotBroadcaster::new(
        simulator.clone(),
        ws_data_broadcaster_tx.clone(),
        server_config.broadcast_interval(),
    )
    .run();

    // --- Periodic status report ---
    let status_report_handle = server_config.status_report_interval().map(|period| {
        let simulator = simulator.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            info!(interval_secs = period.as_secs(), "Status report task started.");
            loop {
                ticker.tick().await;
                info!("\n{}", simulator.status_report().await);
            }
        })
    });

    let connected_clients = ConnectedClients::new();
    let app = create_axum_router(
        simulator.clone(),
        ws_data_broadcaster_tx,
        connected_clients,
        server_config.clone(),
    );

    let addr = server_config.listen_addr;
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_keepalive(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;
    info!(address = %addr, "HTTP server listening.");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    simulator.stop();
    if let Some(handle) = simulation_handle {
        let _ = handle.await;
    }
    broadcaster_handle.abort();
    if let Some(handle) = status_report_handle {
        handle.abort();
    }
    info!("Server stopped.");

    Ok(())
}
