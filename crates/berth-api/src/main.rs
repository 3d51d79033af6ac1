//! Berth server - manifest deploy control plane

use std::sync::Arc;

use anyhow::Context;
use berth_api::{serve, AppState, ServerConfig};
use berth_common::telemetry::{init_telemetry, TelemetryConfig};
use berth_deploy::{
    AuditQueue, DeployService, LogAuditWriter, ScheduleReaper, StaticDirectory, Stores,
};
use berth_executor::{ClusterClient, KubeClusterClient, LocalBackend};
use berth_store::{MemoryStore, PostgresStore, Project, ProjectStore};
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    let telemetry = init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    let result = run(config).await;
    telemetry.shutdown();
    result
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let deploy_config = config.deploy_config()?;

    let directory = match &config.tenancy_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read tenancy file {}", path.display()))?;
            StaticDirectory::from_yaml(&text)
                .with_context(|| format!("invalid tenancy file {}", path.display()))?
        }
        None => {
            warn!("no tenancy file configured, every deploy will be refused group membership");
            StaticDirectory::default()
        }
    };
    let directory = Arc::new(directory);

    let stores = match &config.database_url {
        Some(url) => {
            let store = Arc::new(
                PostgresStore::new(url)
                    .await
                    .context("failed to connect to PostgreSQL")?,
            );
            seed_projects(store.as_ref(), &directory.projects).await?;
            info!("using PostgreSQL store");
            Stores::shared(store)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            seed_projects(store.as_ref(), &directory.projects).await?;
            warn!("no database configured, state is kept in memory");
            Stores::shared(store)
        }
    };

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client));
    let backend = Arc::new(LocalBackend::new(stores.jobs.clone(), cluster.clone()));
    let (audit, audit_task) = AuditQueue::spawn(Arc::new(LogAuditWriter), config.audit_capacity);

    let shutdown = CancellationToken::new();
    let reaper = ScheduleReaper::new(
        stores.projects.clone(),
        stores.jobs.clone(),
        backend.clone(),
        deploy_config.schedule_offset,
    );
    let reaper_task = tokio::spawn(reaper.run(config.reaper_interval(), shutdown.clone()));

    let service = DeployService::new(
        stores,
        backend,
        cluster,
        directory.clone(),
        directory,
        audit,
        deploy_config,
    );
    let state = AppState {
        service: Arc::new(service),
    };

    tokio::spawn(shutdown_on_signal(shutdown.clone()));
    serve(config.listen_addr, state, shutdown.clone())
        .await
        .context("API server failed")?;

    // The server has dropped its state, closing the audit queue
    shutdown.cancel();
    if let Err(e) = reaper_task.await {
        warn!(error = %e, "schedule reaper task failed");
    }
    if let Err(e) = audit_task.await {
        warn!(error = %e, "audit task failed");
    }
    info!("shutdown complete");
    Ok(())
}

async fn seed_projects(store: &dyn ProjectStore, projects: &[Project]) -> anyhow::Result<()> {
    for project in projects {
        store
            .upsert(project)
            .await
            .with_context(|| format!("failed to seed project {}", project.id))?;
    }
    info!(count = projects.len(), "projects seeded");
    Ok(())
}

async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    token.cancel();
}
