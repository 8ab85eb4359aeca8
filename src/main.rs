use anyhow::Context;
use clap::Parser;
use claude_model_gateway::{
    client::{ProviderClients, build_http_client},
    config::GatewayConfig,
    forward::TransparentForwarder,
    handler::{AppState, app},
    metrics::METRICS,
    recorder::{RecordStores, Recorder},
    registry::ModelRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Anthropic Messages API gateway for OpenAI-compatible, Gemini and Anthropic backends
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<String>,

    /// Start in transparent-forward mode
    #[arg(long)]
    no_routing: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("claude_model_gateway=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::from_env()?,
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if args.no_routing {
        config.server.routing_enabled = false;
    }
    config.validate()?;

    let registry = Arc::new(ModelRegistry::from_config(&config));
    let timeout_secs = config.server.request_timeout_secs;
    let clients = ProviderClients::from_table(&registry.snapshot(), timeout_secs)?;

    let stores = Arc::new(RecordStores::default());
    let (sink, _recorder) = Recorder::spawn(stores.clone());
    let forwarder = TransparentForwarder::new(
        build_http_client()?,
        &config.forward,
        timeout_secs,
        sink.clone(),
    );

    let state = Arc::new(AppState::new(
        registry.clone(),
        clients,
        forwarder,
        sink,
        stores,
        config.server.routing_enabled,
    ));

    let status = registry.status();
    info!("Starting Claude model gateway...");
    info!("  Listen: {}", config.server.listen_addr);
    let mode = if config.server.routing_enabled {
        "enabled"
    } else {
        "transparent forward"
    };
    info!("  Routing: {}", mode);
    info!("  Aliases: {:?}", status.aliases);
    info!("  Available providers: {:?}", status.available_providers);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    info!("{}", METRICS.snapshot());
    Ok(())
}
