//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers::{self, accounts, attendance, billing, customers};
use crate::services::{
    init_metrics, BillingEngine, BillingStore, KeyedLocks, LedgerMirror, MongoBillingStore,
    PaymentRecorder,
};
use axum::{
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{request_id_middleware, RequestId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub engine: BillingEngine,
    pub payments: PaymentRecorder,
    pub mirror: LedgerMirror,
}

impl AppState {
    pub fn new(config: BillingConfig, store: Arc<dyn BillingStore>) -> Self {
        // Generation and payments serialize on the same (customer, period) keys.
        let locks = KeyedLocks::new();
        let mirror = LedgerMirror::new(store.clone());
        let engine = BillingEngine::new(
            store.clone(),
            mirror.clone(),
            locks.clone(),
            config.billing.due_day,
        );
        let payments = PaymentRecorder::new(
            store.clone(),
            mirror.clone(),
            locks,
            config.billing.payment_status_policy,
        );

        Self {
            config,
            store,
            engine,
            payments,
            mirror,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Billing
        .route("/billing", get(billing::list_bills))
        .route(
            "/billing/generate-monthly",
            post(billing::generate_monthly_bills),
        )
        .route("/billing/summary", get(billing::period_summary))
        .route("/billing/mark-overdue", post(billing::mark_overdue))
        .route("/billing/ledger/retry", post(billing::retry_ledger))
        .route(
            "/billing/customer/:customer_id",
            get(billing::list_customer_bills),
        )
        .route(
            "/billing/:id",
            get(billing::get_bill).delete(billing::delete_bill),
        )
        .route("/billing/:id/payment", post(billing::record_payment))
        .route("/billing/:id/status", put(billing::update_bill_status))
        // Customers
        .route(
            "/customers",
            post(customers::create_customer).get(customers::list_customers),
        )
        .route(
            "/customers/:id",
            get(customers::get_customer).put(customers::update_customer),
        )
        // Attendance
        .route("/attendance", put(attendance::mark_attendance))
        .route(
            "/attendance/customer/:customer_id",
            get(attendance::list_customer_attendance),
        )
        // Ledger accounts
        .route("/accounts", post(accounts::create_account))
        .route(
            "/accounts/:id/transactions",
            get(accounts::list_account_transactions),
        )
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(|id| id.0.as_str())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Outermost, so the trace span already sees the request id.
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against MongoDB, creating indexes on the way.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store = MongoBillingStore::connect(
            config.database.uri.expose_secret(),
            &config.database.name,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to MongoDB");
            AppError::from(e)
        })?;

        store.initialize_indexes().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to create indexes");
            AppError::from(e)
        })?;

        Self::build_with_store(config, Arc::new(store)).await
    }

    /// Build the application on top of an already constructed store.
    pub async fn build_with_store(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let host: std::net::IpAddr = config.common.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid host '{}': {}",
                config.common.host,
                e
            ))
        })?;
        let http_addr = SocketAddr::new(host, config.common.port);
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Billing service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState::new(config, store),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
