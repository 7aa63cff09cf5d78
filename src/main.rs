use rent_payments::api::{self, AppState};
use rent_payments::config::AppConfig;
use rent_payments::database::payment_repository::{PaymentRecordStore, PgPaymentRepository};
use rent_payments::database::{init_pool, run_migrations, PoolConfig};
use rent_payments::logging::init_tracing;
use rent_payments::payments::provider::PaymentGateway;
use rent_payments::payments::providers::razorpay::RazorpayGateway;
use rent_payments::services::{LifecycleConfig, LogNotifier, PaymentLifecycle, PaymentNotifier};
use rent_payments::workers::payment_reconciliation::PaymentReconciliationWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting rent payments service"
    );
    info!(gateway = ?config.gateway, "Gateway configuration loaded");

    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool(
        &config.database.url,
        Some(PoolConfig::from(&config.database)),
    )
    .await
    .map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    run_migrations(&db_pool).await?;

    let store: Arc<dyn PaymentRecordStore> = Arc::new(PgPaymentRepository::new(db_pool));
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(RazorpayGateway::new(config.gateway.clone()).map_err(|e| {
            error!("❌ Failed to initialize payment gateway: {}", e);
            e
        })?);
    let notifier: Arc<dyn PaymentNotifier> = Arc::new(LogNotifier::new());

    let lifecycle = Arc::new(PaymentLifecycle::new(
        store,
        Arc::clone(&gateway),
        notifier,
        LifecycleConfig::from(&config.gateway),
    ));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut reconciliation_handle = None;
    if config.reconciliation.enabled {
        info!(
            interval_secs = config.reconciliation.interval.as_secs(),
            stale_after_secs = config.reconciliation.stale_after.as_secs(),
            abandon_after_secs = config.reconciliation.abandon_after.as_secs(),
            batch_size = config.reconciliation.batch_size,
            "Starting payment reconciliation worker"
        );
        let worker = PaymentReconciliationWorker::new(
            Arc::clone(&lifecycle),
            config.reconciliation.clone(),
        );
        reconciliation_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Payment reconciliation worker disabled (RECONCILIATION_ENABLED=false)");
    }

    let app = api::router(AppState::new(lifecycle, gateway));
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║          🚀 RENT PAYMENTS SERVER IS RUNNING 🚀              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🌐 Server Address:  http://{}", addr);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║  GET  /health                    - Health check             ║");
    println!("║  GET  /health/live               - Liveness probe           ║");
    println!("║  POST /payment/initiate          - Create a gateway order   ║");
    println!("║  POST /payment/verify            - Confirm a checkout       ║");
    println!("║  POST /payment/cancel            - Cancel a pending payment ║");
    println!("║  POST /payment/list              - Search payments          ║");
    println!("║  GET  /payment/{{id}}              - Payment details          ║");
    println!("║  POST /webhook/payment           - Gateway webhooks         ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = reconciliation_handle {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciliation worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
