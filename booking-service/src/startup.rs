//! Application wiring and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::{BookingConfig, StorageBackend};
use crate::handlers;
use crate::services::gateways::{GatewayRegistry, PaymentGateway, RazorpayGateway, StripeGateway};
use crate::services::notifier::{HttpNotifier, LogNotifier, NotificationDispatcher, Notifier};
use crate::services::realtime::{BroadcastRealtime, NoopRealtime, RealtimeChannel};
use crate::services::store::{InMemoryLedgerStore, LedgerStore, MongoLedgerStore};
use crate::services::vehicles::{InMemoryVehicleDirectory, MongoVehicleDirectory, VehicleDirectory};
use crate::services::{
    BookingService, Clock, ExpirySweeper, MongoDb, PaymentService, ReconciliationEngine,
    SystemClock,
};
use crate::workers::Scheduler;

/// Collaborators the services are built from. Tests assemble this by hand
/// with in-memory stores and a manual clock.
pub struct Dependencies {
    pub store: Arc<dyn LedgerStore>,
    pub vehicles: Arc<dyn VehicleDirectory>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub realtime: Arc<dyn RealtimeChannel>,
    pub gateways: GatewayRegistry,
    pub currency: String,
    pub stale_after: chrono::Duration,
    pub reminder_lead: chrono::Duration,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub bookings: BookingService,
    pub payments: PaymentService,
    pub reconciliation: ReconciliationEngine,
    pub sweeper: Arc<ExpirySweeper>,
    pub store: Arc<dyn LedgerStore>,
    pub realtime: Arc<dyn RealtimeChannel>,
}

impl AppState {
    pub fn from_dependencies(deps: Dependencies) -> Self {
        let dispatcher = NotificationDispatcher::new(deps.notifier);

        let bookings = BookingService::new(
            deps.store.clone(),
            deps.vehicles.clone(),
            deps.clock.clone(),
            dispatcher.clone(),
            deps.realtime.clone(),
            deps.currency,
        );
        let payments =
            PaymentService::new(deps.store.clone(), deps.gateways.clone(), deps.clock.clone());
        let reconciliation = ReconciliationEngine::new(
            deps.store.clone(),
            deps.gateways,
            deps.clock.clone(),
            dispatcher.clone(),
            deps.realtime.clone(),
        );
        let sweeper = Arc::new(ExpirySweeper::new(
            deps.store.clone(),
            deps.vehicles,
            deps.clock,
            dispatcher,
            deps.stale_after,
            deps.reminder_lead,
        ));

        Self {
            bookings,
            payments,
            reconciliation,
            sweeper,
            store: deps.store,
            realtime: deps.realtime,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/bookings",
            post(handlers::bookings::create_booking).get(handlers::bookings::list_bookings),
        )
        .route("/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/bookings/:id/transactions",
            get(handlers::bookings::list_transactions),
        )
        .route(
            "/bookings/:id/charges",
            post(handlers::payments::create_charge),
        )
        .route(
            "/admin/bookings/complete-expired",
            post(handlers::bookings::complete_expired),
        )
        .route(
            "/payments/razorpay/verify",
            post(handlers::payments::verify_razorpay),
        )
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
        .route(
            "/webhooks/razorpay",
            post(handlers::webhooks::razorpay_webhook),
        )
        .route("/events", get(handlers::events::stream_events))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                    role = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: Scheduler,
}

impl Application {
    pub async fn build(config: BookingConfig) -> Result<Self, AppError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let (store, vehicles): (Arc<dyn LedgerStore>, Arc<dyn VehicleDirectory>) =
            match config.storage {
                StorageBackend::Mongo => {
                    let db = MongoDb::connect(
                        config.mongodb.uri.expose_secret(),
                        &config.mongodb.database,
                    )
                    .await
                    .map_err(|e| AppError::DatabaseError(e.into()))?;
                    db.initialize_indexes().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to initialize database indexes");
                        AppError::DatabaseError(e.into())
                    })?;
                    (
                        Arc::new(MongoLedgerStore::new(db.clone())),
                        Arc::new(MongoVehicleDirectory::new(db)),
                    )
                }
                StorageBackend::Memory => {
                    tracing::warn!("Using in-memory storage; data is lost on restart");
                    (
                        Arc::new(InMemoryLedgerStore::new()),
                        Arc::new(InMemoryVehicleDirectory::new()),
                    )
                }
            };

        let stripe = StripeGateway::new(config.stripe.clone(), clock.clone());
        let razorpay = RazorpayGateway::new(config.razorpay.clone());
        for (name, configured) in [
            ("stripe", stripe.is_configured()),
            ("razorpay", razorpay.is_configured()),
        ] {
            if configured {
                tracing::info!(provider = name, "Payment gateway initialized");
            } else {
                tracing::warn!(
                    provider = name,
                    "Gateway credentials not configured - charges with this provider will be rejected"
                );
            }
        }
        let gateways = GatewayRegistry::new(Arc::new(stripe), Arc::new(razorpay));

        let notifier: Arc<dyn Notifier> = match config.notifications.endpoint.as_deref() {
            Some(endpoint) => {
                tracing::info!(endpoint = %endpoint, "Forwarding notifications over HTTP");
                Arc::new(HttpNotifier::new(endpoint))
            }
            None => Arc::new(LogNotifier),
        };

        let realtime: Arc<dyn RealtimeChannel> = if config.realtime.enabled {
            Arc::new(BroadcastRealtime::new(config.realtime.capacity))
        } else {
            Arc::new(NoopRealtime)
        };

        let state = AppState::from_dependencies(Dependencies {
            store,
            vehicles,
            clock,
            notifier,
            realtime,
            gateways,
            currency: config.currency.clone(),
            stale_after: config.scheduler.stale_after(),
            reminder_lead: config.scheduler.reminder_lead(),
        });

        let scheduler = Scheduler::new(config.scheduler.clone(), state.sweeper.clone());

        // Port 0 picks a random port for tests
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!(port, "Booking service listening");

        Ok(Self {
            port,
            listener,
            router: router(state),
            scheduler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT/SIGTERM, then stop the scheduled sweeps.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let handles = self.scheduler.start();

        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.scheduler.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Scheduled task ended abnormally");
            }
        }

        tracing::info!("Service shutdown complete");
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
