//! escrowd daemon
//!
//! Wires the store and external-service clients, then runs the five
//! reconciliation jobs until shutdown. The synchronous lifecycle
//! operations are exposed to the surrounding platform through the
//! service object; this binary only hosts the reconciliation side.

use std::sync::Arc;

use tracing::{info, warn};

use escrowd::clients::{MockBusiness, MockNotifications, MockPayments, MockWallet};
use escrowd::config::AppConfig;
use escrowd::lifecycle::LifecycleService;
use escrowd::scheduler::Scheduler;
use escrowd::store::{MemoryStore, PgStore, TransactionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = AppConfig::load(&env);
    let _guard = escrowd::logging::init_logging(&config);

    info!(env, "escrowd starting");

    let store: Arc<dyn TransactionStore> = match &config.postgres_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("connected to postgres");
            Arc::new(store)
        }
        None => {
            warn!("no postgres_url configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Downstream services are reached through their client traits; the
    // recording mocks stand in until real transports are wired up.
    let payments = Arc::new(MockPayments::new());
    let wallet = Arc::new(MockWallet::new());
    let notifications = Arc::new(MockNotifications::new());
    let business = Arc::new(MockBusiness::new());

    let service = Arc::new(LifecycleService::new(
        store,
        payments.clone(),
        wallet,
        notifications,
        business.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        service,
        payments,
        business,
        config.scheduler.clone(),
    ));

    let handles = scheduler.spawn_all();
    info!(jobs = handles.len(), "reconciliation jobs running");

    // The jobs never resolve; this parks the main task until shutdown
    futures::future::join_all(handles).await;
    Ok(())
}
