use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api::state::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Bodyshop API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Workshop order payments and reconciliation",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "webhooks": "/api/webhooks",
            "orders": "/api/orders",
            "notifications": "/api/notifications/stream"
        }
    }))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.service_context.db_pool).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::error!("Health check could not reach the database: {}", e);
            "unavailable"
        }
    };
    let status = if database == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let subscribers = state
        .service_context
        .push_channel
        .as_ref()
        .map(|channel| channel.subscriber_count())
        .unwrap_or(0);

    (status, Json(json!({
        "status": if database == "ok" { "healthy" } else { "degraded" },
        "database": database,
        "push_channel": state.service_context.push_channel.is_some(),
        "push_subscribers": subscribers,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
