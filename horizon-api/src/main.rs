use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use horizon_api::{app, state::{AppState, AuthSettings}};
use horizon_booking::{spawn_reconciler, BookingConfig, BookingCoordinator, RecoveryQueue};
use horizon_core::{DocumentStore, FixedIdentity};
use horizon_store::{MemoryStore, PgDocumentStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_REPLAY_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "horizon_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = horizon_store::Config::load().expect("Failed to load config");
    tracing::info!("Starting Horizon API on port {}", config.server.port);

    let store: Arc<dyn DocumentStore> = match config.database.url.as_deref() {
        Some(url) if !url.is_empty() => {
            let store = PgDocumentStore::connect(url)
                .await
                .expect("Failed to connect to Postgres");
            store.init_schema().await.expect("Failed to initialize schema");
            tracing::info!("Using Postgres document store");
            Arc::new(store)
        }
        _ => {
            tracing::warn!("No database url configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let coordinator = BookingCoordinator::new(
        store,
        Arc::new(FixedIdentity::anonymous()),
        BookingConfig::from(&config.booking),
    );

    let recovery = Arc::new(RecoveryQueue::new(MAX_REPLAY_ATTEMPTS));
    spawn_reconciler(
        recovery.clone(),
        coordinator.clone(),
        Duration::from_secs(config.booking.reconcile_interval_seconds),
    );

    let app_state = AppState {
        coordinator,
        recovery,
        auth: AuthSettings {
            secret: config.auth.jwt_secret.clone(),
            expiration_seconds: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
