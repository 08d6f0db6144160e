pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        .nest("/api", api_routes())

        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/webhooks", webhook_routes())
        .nest("/orders", order_routes())
        .nest("/notifications", notification_routes())
}

// Authenticated by the callback token, not by user headers.
fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/invoice", post(handlers::webhooks::invoice))
        .route("/payment-request", post(handlers::webhooks::payment_request))
}

fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(handlers::orders::checkout))
        .route("/:id", get(handlers::orders::get))
        .route("/:id/cancel", post(handlers::orders::cancel))
        .route("/:id/work-status", patch(handlers::orders::update_work_status))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth))
}

fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/stream", get(handlers::notifications::subscribe))
        .route_layer(axum::middleware::from_fn(middleware::auth::require_auth))
}
