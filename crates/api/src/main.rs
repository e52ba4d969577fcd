//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use checkout::{
    Checkout, HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway, TracingNotifier,
};
use common::SystemClock;
use domain::TicketCodeSigner;
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &Config) -> Arc<dyn Store> {
    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        return Arc::new(InMemoryStore::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let store = PostgresStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to PostgreSQL");
    Arc::new(store)
}

fn open_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    match config.gateway() {
        Some(gateway) => {
            tracing::info!(base_url = %gateway.base_url, "using HTTP payment gateway");
            Arc::new(HttpPaymentGateway::new(gateway).expect("failed to build gateway client"))
        }
        None => {
            tracing::warn!("payment gateway not configured, using the in-memory gateway");
            Arc::new(InMemoryPaymentGateway::new())
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load .env and configuration
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    // 2. Initialize tracing
    init_tracing(&config);
    if config.uses_dev_ticket_secret() {
        tracing::warn!("TICKET_CODE_SECRET not set, ticket codes use a development key");
    }

    // 3. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Build the checkout services
    let store = open_store(&config).await;
    let gateway = open_gateway(&config);
    let signer = TicketCodeSigner::new(config.ticket_code_secret.as_bytes())
        .expect("invalid TICKET_CODE_SECRET");
    let checkout = Checkout::new(
        store,
        gateway,
        Arc::new(TracingNotifier),
        Arc::new(SystemClock),
        signer,
        config.checkout(),
    );

    // 5. Start the reclaim sweeper
    let shutdown = CancellationToken::new();
    let sweeper = checkout.sweeper().spawn(shutdown.clone());

    // 6. Build the application
    let app = api::create_app(api::AppState::new(checkout), metrics_handle);

    // 7. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "reclaim sweeper task failed");
    }

    tracing::info!("server shut down gracefully");
}
