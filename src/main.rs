use sea_orm_migration::MigratorTrait;
use sea_orm::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use userop_relay::config::RelayConfig;
use userop_relay::jobs::submission_pool::{recover_unfinished, start_submission_pool};
use userop_relay::services::chain_gateway::RpcChainGateway;
use userop_relay::services::intake::IntakeService;
use userop_relay::services::operation_encoder::EntryPointEncoder;
use userop_relay::services::record_store::{RecordStore, SeaOrmRecordStore};
use userop_relay::services::relay_signer::{LocalRelaySigner, RelaySigner};
use userop_relay::services::slot_guard::SlotGuard;
use userop_relay::services::status::StatusService;
use userop_relay::services::submission::{SubmissionSettings, SubmissionWorker};
use userop_relay::{build_router, AppState};

/// How long shutdown waits for in-flight submissions
const SHUTDOWN_DRAIN_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,userop_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = RelayConfig::from_env()?;
    info!(config = ?config, "Starting userop relay");

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;

    // Run migrations
    info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    let gateway = RpcChainGateway::connect(&config.rpc_url, config.receipt_poll_interval).await?;
    let signer = LocalRelaySigner::new(&config.relayer_private_key, gateway.chain_id())?;
    let beneficiary = config.beneficiary.unwrap_or_else(|| signer.address());

    let store: Arc<dyn RecordStore> = Arc::new(SeaOrmRecordStore::new(db.clone()));
    let worker = Arc::new(SubmissionWorker::new(
        Arc::clone(&store),
        Arc::new(gateway),
        Arc::new(signer),
        Arc::new(EntryPointEncoder::new(beneficiary)),
        SubmissionSettings {
            entry_point: config.entry_point,
            gas_limit: config.relay_gas_limit,
            inclusion_timeout: config.inclusion_timeout,
        },
    ));

    let (queue, pool) = start_submission_pool(worker, config.worker_concurrency);
    let slots = SlotGuard::default();

    let recovered = recover_unfinished(store.as_ref(), &slots, &queue).await?;
    if recovered > 0 {
        info!(recovered = recovered, "Re-queued unfinished operations");
    }

    let state = AppState {
        db,
        intake: IntakeService::new(Arc::clone(&store), slots, queue),
        status: StatusService::new(store),
    };

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last queue handle; the pool now drains
    info!("Waiting for in-flight submissions");
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_DRAIN_SECS), pool)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SHUTDOWN_DRAIN_SECS,
            "Submissions still in flight at shutdown, they resume on next start"
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, stopping gracefully");
}
