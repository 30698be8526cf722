//! Rhea MCP server binary.
//!
//! Wires the orchestration core to its collaborators (object store,
//! key-value index, semantic index, descriptor catalog), spawns the REST
//! gateway sidecar, and serves the selected MCP transport. All runtime
//! parameters come from environment variables; the transport is the only
//! command-line choice, mirroring how deployments differ per client.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use uuid::Uuid;

use rhea_core::descriptor::ToolCatalog;
use rhea_core::kv::{KvIndex, RedisIndex};
use rhea_core::mcp_service::{AppState, RheaMcpService};
use rhea_core::retry::RetryConfig;
use rhea_core::scheduler::{
    WorkerScheduler,
    provider::{BatchQueueProvider, BlockProvider, ContainerProvider, LocalProvider, PlainProvider},
};
use rhea_core::semantic::RemoteSemanticIndex;
use rhea_core::session::SessionRegistry;
use rhea_core::settings::{ProviderKind, Settings};
use rhea_common::BlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
    StreamableHttp,
}

#[derive(Debug, Parser)]
#[command(name = "rhea_mcp", about = "Rhea tool orchestration MCP server")]
struct Cli {
    /// Transport protocol to serve.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Override the descriptor catalog path from the environment.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();
    rhea_core::logging::init_logging("info");

    if let Some(port) = settings.debug_port {
        tracing::info!(port, "debug port configured (attach your debugger)");
    }

    let metrics_handle =
        rhea_core::metrics::install_recorder().context("installing metrics recorder")?;

    let store = BlobStore::s3(
        &settings.store_endpoint,
        &settings.store_access_key,
        &settings.store_secret_key,
        &settings.store_bucket,
        settings.store_secure,
    )
    .context("connecting to object store")?;

    let catalog_path = cli
        .catalog
        .unwrap_or_else(|| PathBuf::from(&settings.catalog_path));
    let catalog =
        Arc::new(ToolCatalog::from_file(&catalog_path).with_context(|| {
            format!("loading tool catalog from {}", catalog_path.display())
        })?);
    tracing::info!(tools = catalog.len(), "tool catalog loaded");

    let registry: Arc<dyn KvIndex> = Arc::new(
        RedisIndex::connect(&settings.redis_host, settings.redis_port)
            .await
            .context("connecting to key-value index")?,
    );

    let semantic = Arc::new(RemoteSemanticIndex::new(
        settings.embedding_url.clone(),
        settings.embedding_key.clone(),
        settings.embedding_model.clone(),
        settings.index_url.clone(),
        settings.index_collection.clone(),
    ));

    let run_id = Uuid::new_v4().to_string();
    let scheduler = Arc::new(WorkerScheduler::new(
        settings.scheduler_config(),
        build_provider(&settings),
        store.clone(),
        Arc::clone(&registry),
        run_id.clone(),
    ));
    Arc::clone(&scheduler).start_background_tasks();

    let sessions = Arc::new(SessionRegistry::new(settings.client_ttl));
    Arc::clone(&sessions).start_background_sweeper(Duration::from_secs(60));

    let state = Arc::new(AppState {
        catalog,
        scheduler: Arc::clone(&scheduler),
        store: store.clone(),
        semantic,
        sessions,
        find_tools_top_k: settings.find_tools_top_k,
        retry: RetryConfig::default(),
    });

    // REST sidecar: upload/download/metrics on its own port.
    let gateway_addr: SocketAddr = format!("{}:{}", settings.host, settings.gateway_port)
        .parse()
        .context("gateway bind address")?;
    let gateway = rhea_gateway::router(rhea_gateway::GatewayState::new(
        store.clone(),
        metrics_handle,
    ));
    tokio::spawn(async move {
        if let Err(e) = rhea_gateway::serve(gateway_addr, gateway).await {
            tracing::error!(error = %e, "REST gateway exited");
        }
    });

    let mcp_addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .context("transport bind address")?;
    tracing::info!(run_id = %run_id, transport = ?cli.transport, "rhea server starting");

    match cli.transport {
        Transport::Stdio => serve_stdio(state).await?,
        Transport::Sse => serve_sse(state, mcp_addr).await?,
        Transport::StreamableHttp => serve_streamable_http(state, mcp_addr).await?,
    }

    scheduler.shutdown_all().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn build_provider(settings: &Settings) -> Arc<dyn BlockProvider> {
    match settings.provider {
        ProviderKind::Local => Arc::new(LocalProvider),
        ProviderKind::Plain => Arc::new(PlainProvider),
        ProviderKind::Container => Arc::new(ContainerProvider {
            backend: settings.container_backend.clone(),
            network: settings.container_network.clone(),
            image: settings.container_image.clone(),
        }),
        ProviderKind::BatchQueue => Arc::new(BatchQueueProvider {
            queue: settings.pbs_queue.clone(),
            account: settings.pbs_account.clone(),
            walltime: settings.pbs_walltime.clone(),
        }),
    }
}

async fn serve_stdio(state: Arc<AppState>) -> Result<()> {
    use rmcp::ServiceExt;

    let service = RheaMcpService::new(state);
    let running = service
        .serve(rmcp::transport::io::stdio())
        .await
        .context("starting stdio transport")?;
    running.waiting().await?;
    Ok(())
}

async fn serve_sse(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    use rmcp::transport::sse_server::SseServer;

    let cancel = SseServer::serve(addr)
        .await
        .context("starting SSE transport")?
        .with_service(move || RheaMcpService::new(Arc::clone(&state)));

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    Ok(())
}

async fn serve_streamable_http(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    use rmcp::transport::streamable_http_server::{
        StreamableHttpService, session::local::LocalSessionManager,
    };

    // One service instance per session id, so each client's tool registry
    // stays isolated.
    let service: StreamableHttpService<RheaMcpService, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(RheaMcpService::new(Arc::clone(&state))),
            Default::default(),
            Default::default(),
        );

    let router = axum::Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding streamable HTTP transport")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
