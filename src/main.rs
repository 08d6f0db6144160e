use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bodyshop::{
    api,
    config::Settings,
    notifications::BroadcastPushChannel,
    payments::{PaymentGateway, UnconfiguredGateway, XenditClient},
    repository::pool,
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bodyshop=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting Bodyshop server on {}:{}", settings.server.host, settings.server.port);

    if settings.gateway.callback_token.is_empty() {
        tracing::warn!("No gateway callback token configured; every webhook will be rejected");
    }

    // Initialize database
    let db_pool = pool::connect(&settings.database).await?;
    pool::migrate(&db_pool).await?;

    // Payment gateway
    let gateway: Arc<dyn PaymentGateway> = match XenditClient::new(&settings.gateway) {
        Some(client) => {
            tracing::info!("Payment gateway enabled at {}", settings.gateway.api_base_url);
            Arc::new(client)
        }
        None => {
            tracing::warn!("Payment gateway secret key missing; checkout and refunds will fail");
            Arc::new(UnconfiguredGateway)
        }
    };

    // Realtime notifications
    let push_channel = if settings.notifications.enabled {
        Some(Arc::new(BroadcastPushChannel::new(settings.notifications.channel_capacity)))
    } else {
        tracing::info!("Realtime notifications disabled");
        None
    };

    let service_context = Arc::new(ServiceContext::new(
        db_pool,
        gateway,
        push_channel,
        &settings,
    ));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let app = api::create_app(service_context, Arc::new(settings));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
