use ota_core::api::{server, AppState};
use ota_core::obs::Metrics;
use ota_core::util::config::Config;
use ota_core::util::shutdown::shutdown_signal;
use ota_core::util::usage;
use tracing_subscriber::EnvFilter;

const APP_VERSION: &str = match option_env!("OTA_APP_VERSION") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if usage::handle_cli_flags(APP_VERSION) {
        return Ok(());
    }

    init_tracing();

    let config = Config::load()?;
    let state = AppState::from_config(config, Metrics::new());
    tracing::info!(
        listen = %state.config.listen,
        bucket = %state.config.storage_bucket,
        "starting OTA update server"
    );

    let servers = server::build_servers(state)?;
    tokio::select! {
        _ = servers.run_all() => {},
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
