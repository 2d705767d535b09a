use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use wayfare_backend::api::{self, AppState};
use wayfare_backend::config::AppConfig;
use wayfare_backend::database::Stores;
use wayfare_backend::health::HealthChecker;
use wayfare_backend::logging::init_tracing;
use wayfare_backend::payments::providers::{HttpFundWallet, HttpPaymentGateway};
use wayfare_backend::services::alerting::AlertService;
use wayfare_backend::services::booking_orchestrator::{BookingOrchestrator, OrchestratorConfig};
use wayfare_backend::services::side_effects::BestEffortHooks;
use wayfare_backend::services::webhook_processor::WebhookProcessor;
use wayfare_backend::suppliers::health::{HttpProviderHealthSource, ProviderHealthSource};
use wayfare_backend::suppliers::{HttpSupplierClient, SupplierRegistry};
use wayfare_backend::workers::trigger_engine::{TriggerEngine, TriggerEngineConfig};
use wayfare_backend::workers::webhook_retry::WebhookRetryWorker;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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

fn worker_enabled(name: &str) -> bool {
    std::env::var(name)
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        skip_externals = config.skip_externals,
        "🚀 Starting Wayfare booking backend"
    );

    // Storage
    let mut health_checker = HealthChecker::new();
    let stores = match &config.database {
        #[cfg(feature = "database")]
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = wayfare_backend::database::init_pool_from_config(db_config)
                .await
                .map_err(|e| {
                    error!("Failed to initialize database pool: {}", e);
                    e
                })?;
            if db_config.run_migrations {
                wayfare_backend::database::run_migrations(&pool).await?;
            }
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            health_checker = health_checker.with_database(pool.clone());
            Stores::postgres(pool)
        }
        #[cfg(not(feature = "database"))]
        Some(_) => {
            warn!("DATABASE_URL is set but the database feature is disabled; using in-memory store");
            Stores::in_memory()
        }
        None => {
            info!("⏭️  Using in-memory store (SKIP_EXTERNALS=true)");
            Stores::in_memory()
        }
    };

    // Collaborators
    let payments = Arc::new(HttpPaymentGateway::new(config.payments.clone())?);
    let funds = Arc::new(HttpFundWallet::new(config.fund.clone())?);

    let supplier_timeout = Duration::from_secs(config.suppliers.request_timeout);
    let mut suppliers = SupplierRegistry::new();
    for endpoint in &config.suppliers.endpoints {
        let client = HttpSupplierClient::new(
            endpoint.supplier_id.clone(),
            endpoint.base_url.clone(),
            supplier_timeout,
        )?;
        suppliers.register(endpoint.booking_type, endpoint.priority, Arc::new(client));
        info!(
            supplier = %endpoint.supplier_id,
            booking_type = %endpoint.booking_type,
            priority = endpoint.priority,
            "Supplier registered"
        );
    }
    if suppliers.is_empty() {
        warn!("No suppliers configured (SUPPLIERS); every booking will be rejected");
    }

    let health_feed: Option<Arc<dyn ProviderHealthSource>> = match &config.suppliers.health_url {
        Some(url) => Some(Arc::new(HttpProviderHealthSource::new(
            url.clone(),
            Duration::from_secs(10),
        )?)),
        None => {
            info!("PROVIDER_HEALTH_URL not set; supplier triggers disabled");
            None
        }
    };
    if let Some(feed) = &health_feed {
        health_checker = health_checker.with_health_feed(feed.clone());
    }

    // Services
    let orchestrator = Arc::new(BookingOrchestrator::new(
        &stores,
        payments,
        funds,
        suppliers,
        BestEffortHooks::logging(),
        OrchestratorConfig::from_env(),
    ));
    let webhook_processor = Arc::new(WebhookProcessor::new(
        &stores,
        orchestrator.clone(),
        &config.webhooks,
    ));

    let trigger_config = TriggerEngineConfig::from_env();
    trigger_config.validate()?;
    let trigger_engine = Arc::new(TriggerEngine::new(
        &stores,
        orchestrator.clone(),
        health_feed,
        trigger_config,
    ));

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    if worker_enabled("TRIGGER_ENGINE_ENABLED") {
        worker_handles.push(tokio::spawn(
            trigger_engine.clone().run(worker_shutdown_rx.clone()),
        ));
    } else {
        info!("Trigger engine worker disabled (TRIGGER_ENGINE_ENABLED=false)");
    }

    if worker_enabled("WEBHOOK_RETRY_ENABLED") {
        let retry_worker = WebhookRetryWorker::new(
            stores.ledger.clone(),
            webhook_processor.clone(),
            &config.webhooks,
        );
        worker_handles.push(tokio::spawn(retry_worker.run(worker_shutdown_rx.clone())));
    } else {
        info!("Webhook retry worker disabled (WEBHOOK_RETRY_ENABLED=false)");
    }

    let app = api::router(AppState {
        orchestrator,
        webhooks: webhook_processor,
        alerts: AlertService::new(stores.alerts.clone()),
        triggers: trigger_engine,
        health_checker,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
