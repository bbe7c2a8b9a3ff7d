//! Lead service entry point.

use lead_service::{ContactFormAdapter, LeadServiceConfig, LogFormat};
use leadkit::adapter::ValidatedAdapter;
use leadkit::config::StoreBackendKind;
use leadkit::handlers::LeadHandlers;
use leadkit::message::MessageComposer;
use leadkit::pipeline::WorkerContext;
use leadkit::render::HttpDocumentRenderer;
use leadkit::store::{FileBackend, MemoryBackend, RecordBackend, RecordStore};
use leadkit::transmit::SmtpTransmitter;
use leadkit::trigger::HttpTrigger;
use leadkit::LeadKitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = LeadServiceConfig::load()?;
    init_tracing(service.log.format);

    info!("Starting lead service");

    let config = Arc::new(LeadKitConfig::load()?);
    let site = ContactFormAdapter::new(config.site.slug.clone());
    let adapter = ValidatedAdapter::new(Arc::new(site))?;

    let store = build_store(&config, &adapter)?;
    info!(store = %store.name(), backend = ?config.store.backend, "record store configured");

    let context = WorkerContext::new(
        adapter,
        Arc::new(HttpDocumentRenderer::new(
            config.render.endpoint.clone(),
            config.site.url.clone(),
            config.render.timeout(),
        )),
        Arc::new(SmtpTransmitter::new(config.smtp.clone())),
        MessageComposer::new(config.message.clone()),
    );
    info!(
        host = ?config.smtp.host,
        port = config.smtp.port,
        secure = config.smtp.is_secure(),
        "SMTP transport configured"
    );

    let background_path = config.background_path(context.adapter.background_path());
    let trigger = HttpTrigger::new(background_path.as_str(), config.jobs.trigger_timeout())?;

    let handlers = Arc::new(LeadHandlers::new(
        store,
        Arc::new(context),
        Arc::new(trigger),
        Arc::clone(&config),
    ));
    let app = leadkit::router(Arc::clone(&handlers));

    let addr: SocketAddr = format!("{}:{}", service.service.host, service.service.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, background = %background_path, "Lead service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Lead service shutting down");
        })
        .await?;

    handlers.drain(config.jobs.shutdown_grace()).await;
    handlers.shutdown();
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn build_store(config: &LeadKitConfig, adapter: &ValidatedAdapter) -> anyhow::Result<RecordStore> {
    let name = config.store_name(adapter.store_name(), adapter.slug());
    let backend: Arc<dyn RecordBackend> = match config.store.backend {
        StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
        StoreBackendKind::File => Arc::new(FileBackend::new(config.store.dir_or_default(), &name)),
        StoreBackendKind::Redis => redis_backend(config, &name)?,
    };
    Ok(RecordStore::new(name, backend))
}

#[cfg(feature = "redis")]
fn redis_backend(config: &LeadKitConfig, name: &str) -> anyhow::Result<Arc<dyn RecordBackend>> {
    let url = config
        .store
        .redis_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("store.redis_url is required for the redis backend"))?;
    Ok(Arc::new(leadkit::store::RedisBackend::new(url, name)))
}

#[cfg(not(feature = "redis"))]
fn redis_backend(_config: &LeadKitConfig, _name: &str) -> anyhow::Result<Arc<dyn RecordBackend>> {
    anyhow::bail!("the redis store backend requires building with the `redis` feature")
}
