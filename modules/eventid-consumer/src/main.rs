use std::sync::Arc;

use anyhow::Result;
use eventid_common::Config;
use eventid_consumer::server;
use eventid_consumer::{AuditPipeline, EventIngestor, HandlerRegistry, IngestMetrics, KafkaBroker, RetryPolicy};
use eventid_engine::{ActionPolicy, DefaultActionExecutor, HttpPlatformClient, PgWorkflowStore, WorkflowEngine};
use eventid_events::{EventStore, PgDeadLetterStore};
use eventid_workspaces::{PgWorkspaceRegistry, WorkspaceMatcher};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("eventid=info".parse()?))
        .json()
        .init();

    info!("Starting eventid-consumer");

    let config = Config::from_env();
    config.log_redacted();

    let pool = eventid_events::connect(&config).await?;
    eventid_events::migrate(&pool).await?;
    info!("Migrations complete");

    let metrics = Arc::new(IngestMetrics::new()?);
    let broker = Arc::new(KafkaBroker::connect(&config)?);

    let platforms = Arc::new(HttpPlatformClient::new(
        config.platform_urls.clone(),
        config.action_timeout,
    )?);
    let executor = Arc::new(DefaultActionExecutor::new(broker.clone(), platforms));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(PgWorkflowStore::new(pool.clone())),
        executor,
        ActionPolicy::from_config(&config),
    ));
    let matcher = WorkspaceMatcher::new(Arc::new(PgWorkspaceRegistry::new(pool.clone())));

    let pipeline = Arc::new(AuditPipeline::new(
        Arc::new(EventStore::new(pool.clone())),
        matcher,
        engine.clone(),
        metrics.clone(),
        config.max_causation_depth,
    ));
    let ingestor = EventIngestor::new(
        broker,
        HandlerRegistry::with_defaults(pipeline),
        Arc::new(PgDeadLetterStore::new(pool.clone())),
        metrics.clone(),
        RetryPolicy::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_handle = tokio::spawn(server::serve(
        config.metrics_port,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    // Workflows still running a grace period after the signal are cancelled.
    let cancel = engine.cancel_handle();
    let grace = config.action_timeout;
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining partitions");
        let _ = shutdown_tx.send(true);
        tokio::time::sleep(grace).await;
        cancel.cancel("shutdown");
    });

    let result = ingestor.run(shutdown_rx).await;

    match server_handle.await {
        Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
        Err(e) => error!(error = %e, "Metrics server task panicked"),
        Ok(Ok(())) => {}
    }

    pool.close().await;
    info!("eventid-consumer stopped");
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
