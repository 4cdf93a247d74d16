use bookflow::api;
use bookflow::config;
use bookflow::db;

use bookflow::jobs::{
    AttemptOrchestrator, AttemptsRepo, CredentialsRepo, JobsRepo, PgCredentialSource, PgJobStore,
    Scheduler,
};
use bookflow::providers::HttpProviderFactory;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bookflow=info,worker=info")),
        )
        .init();

    let cfg = config::Config::from_env()?;
    let api_addr = cfg.admin_addr.clone();

    info!(
        poll_seconds = cfg.poll_seconds,
        due_jobs_limit = cfg.due_jobs_limit,
        max_concurrent_attempts = cfg.max_concurrent_attempts,
        api = api_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        "bookflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url, &cfg.pool_settings()).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    // ---- Engine wiring ----
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let credentials = Arc::new(PgCredentialSource::new(
        CredentialsRepo::new(pool.clone()),
        cfg.fallback_credentials(),
    ));
    let http = reqwest::Client::builder()
        .timeout(cfg.provider_settings().request_timeout)
        .build()?;
    let providers = Arc::new(HttpProviderFactory::new(http, cfg.provider_settings()));

    let orchestrator =
        AttemptOrchestrator::new(store.clone(), credentials, providers, cfg.contact.clone());
    let scheduler = Scheduler::new(store, orchestrator, cfg.scheduler_config());

    let cancel = CancellationToken::new();

    // ---- API task ----
    let api_state = api::ApiState {
        jobs: JobsRepo::new(pool.clone()),
        attempts: AttemptsRepo::new(pool.clone()),
    };
    let app = api::router(api_state);

    let api_cancel = cancel.clone();
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("admin api listening on http://{addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { api_cancel.cancelled().await })
                .await?;
        } else {
            api_cancel.cancelled().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Scheduler task ----
    let sched_cancel = cancel.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(sched_cancel).await;
    });

    // ---- Shutdown ----
    shutdown_signal().await;
    info!("shutdown requested");
    cancel.cancel();

    scheduler_handle.await?;
    if let Err(e) = api_handle.await? {
        error!(error = %e, "admin api exited with error");
    }

    pool.close().await;
    info!("bookflow worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
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
