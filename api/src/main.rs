use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use dbpulse_api::background;
use dbpulse_api::cli::CliArguments;
use dbpulse_api::generator::OpenAiGenerator;
use dbpulse_api::routes;
use dbpulse_api::state::AppState;
use dbpulse_api::store::SqliteTelemetryStore;
use dbpulse_collector::connector::NativeConnectorFactory;
use dbpulse_collector::tunnel::TunnelConfig;
use dbpulse_collector::vault::CredentialVault;

macro_rules! fatal {
    ($err:expr, $msg:literal) => {{
        error!(fatal = true, error = %$err, $msg);
        process::exit(1);
    }};
    ($err:expr, $msg:literal, $($key:tt = $val:expr),+) => {{
        error!(fatal = true, error = %$err, $($key = %$val),+, $msg);
        process::exit(1);
    }};
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let cli_args = CliArguments::parse();

    info!(
        api_address = %cli_args.api_address,
        data_dir = %cli_args.data_dir.display(),
        "Starting dbpulse API server"
    );

    // Credential vault
    let retired_keys = cli_args
        .retired_keys()
        .unwrap_or_else(|e| fatal!(e, "Invalid retired key configuration"));
    let vault = Arc::new(
        CredentialVault::new(
            cli_args.encryption_key_id.clone(),
            &cli_args.encryption_key,
            &retired_keys,
        )
        .unwrap_or_else(|e| fatal!(e, "Invalid encryption key configuration")),
    );

    info!(key_id = %cli_args.encryption_key_id, retired = retired_keys.len(), "Credential vault ready");

    // Telemetry store
    if let Err(e) = std::fs::create_dir_all(&cli_args.data_dir) {
        fatal!(e, "Failed to create data directory", path = cli_args.data_dir.display());
    }
    let store_path = cli_args.data_dir.join("telemetry.db");
    let store_path = store_path
        .to_str()
        .unwrap_or_else(|| fatal!("non-utf8 path", "Invalid data directory"));
    let store = Arc::new(
        SqliteTelemetryStore::open(store_path)
            .await
            .unwrap_or_else(|e| fatal!(e, "Failed to open telemetry store", path = store_path)),
    );

    // Optional SOCKS5 tunnel for reaching tenant databases
    let tunnel = cli_args
        .socks_proxy
        .clone()
        .map(|endpoint| TunnelConfig { endpoint });
    if let Some(tunnel) = &tunnel {
        info!(proxy = %tunnel.endpoint, "Database traffic will route through SOCKS5 tunnel");
    }

    // Suggestion generator
    let generator = Arc::new(OpenAiGenerator::new(
        cli_args.generator_url.clone(),
        cli_args.generator_api_key.clone(),
        cli_args.generator_model.clone(),
        Duration::from_secs(cli_args.generator_timeout_secs),
    ));
    if cli_args.generator_api_key.is_none() {
        info!("Suggestion generator not configured; suggestion runs will fail until a key is set");
    }

    let state = AppState::new(
        store,
        vault,
        Arc::new(NativeConnectorFactory),
        generator,
        tunnel,
        cli_args.slow_query_threshold_ms,
    );

    // Background polling of due connections
    background::start_poll_scheduler(state.clone(), Duration::from_secs(cli_args.poll_tick_secs));

    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&cli_args.api_address)
        .await
        .unwrap_or_else(|e| fatal!(e, "Failed to bind", address = cli_args.api_address));

    info!(address = %cli_args.api_address, "API server listening");

    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| fatal!(e, "Server failed"));
}
