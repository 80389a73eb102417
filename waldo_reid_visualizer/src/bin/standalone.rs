use tracing_subscriber::EnvFilter;
use waldo_reid::StopSignal;
use waldo_reid_visualizer::{start_server, ControlHandle, ServerConfig, TelemetryBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Bind address from env or default
    let cfg = ServerConfig::from_env();
    let bus = TelemetryBus::new(64);
    let stop = StopSignal::new();
    let control = ControlHandle { stop: stop.clone(), session: None };

    let handle = start_server(bus, cfg, control).await?;

    // Park until ctrl-c or a /control/stop request.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => stop.stop(),
        _ = async {
            while !stop.is_stopped() {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        } => {}
    }
    handle.abort();
    Ok(())
}
