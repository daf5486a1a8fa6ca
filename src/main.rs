use clap::Parser;
use dotenvy::dotenv;
use rust_convert_backend::config::ServiceConfig;
use rust_convert_backend::infrastructure::{store, telemetry};
use rust_convert_backend::services::reaper::Reaper;
use rust_convert_backend::{AppState, create_app};
use std::net::{IpAddr, SocketAddr};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & Logging
    dotenv().ok();
    let args = Args::parse();
    telemetry::init_tracing();

    info!("🚀 Starting Rust Convert Backend...");

    // 2. Configuration & Staging Store
    let config = ServiceConfig::from_env();
    info!(
        "⚙️  Config: Max Size={}MB, JPEG Quality={}, Renderer={:?}, Inline Sweep={}",
        config.max_content_length / 1024 / 1024,
        config.jpeg_quality,
        config.renderer,
        config.sweep_after_conversion
    );

    let store = store::setup_store(&config).await?;

    // 3. Reaper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = Reaper::new(
        store.clone(),
        config.ttl(),
        config.sweep_interval(),
        shutdown_rx,
    )
    .spawn();

    // 4. API Service
    let host: IpAddr = config.host.parse()?;
    let state = AppState::new(store, config);
    info!("🖨️  Split renderer: {}", state.pipeline.renderer_name());

    let app = telemetry::with_http_tracing(create_app(state));
    let addr = SocketAddr::from((host, args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ Conversion API listening on http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_tx))
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    // 5. Drain the reaper
    if reaper_handle.await.is_err() {
        error!("❌ Reaper task ended abnormally");
    }

    info!("👋 Backend exited cleanly.");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, telling the reaper to stop at the same time.
async fn wait_for_shutdown(reaper: watch::Sender<bool>) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("❌ SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let source = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };

    info!("🛑 {} received, stopping conversions and the reaper...", source);
    let _ = reaper.send(true);
}
