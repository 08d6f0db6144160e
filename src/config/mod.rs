use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Shared secret the gateway sends in `x-callback-token`.
    pub callback_token: String,
    pub secret_key: Option<String>,
    pub api_base_url: String,
    pub currency: String,
    /// Flat platform fee added to every checkout, in minor units.
    pub admin_fee: i64,
    /// Reference id the gateway uses for its dashboard "test webhook" button.
    pub test_reference_id: String,
    pub success_redirect_url: Option<String>,
    pub failure_redirect_url: Option<String>,
    pub invoice_duration_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub transaction_timeout_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1,
            transaction_timeout_secs: 5,
        }
    }
}

impl ReconcilerConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: 1024,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://bodyshop.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.busy_timeout_secs", 5)?
            .set_default("gateway.callback_token", "")?
            .set_default("gateway.api_base_url", "https://api.xendit.co")?
            .set_default("gateway.currency", "IDR")?
            .set_default("gateway.admin_fee", 0)?
            .set_default("gateway.test_reference_id", "invoice_123124123")?
            .set_default("gateway.invoice_duration_secs", 86400)?
            .set_default("reconciler.max_attempts", 3)?
            .set_default("reconciler.base_delay_secs", 1)?
            .set_default("reconciler.transaction_timeout_secs", 5)?
            .set_default("notifications.enabled", true)?
            .set_default("notifications.channel_capacity", 1024)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with BODYSHOP__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("BODYSHOP").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://bodyshop.db?mode=rwc".to_string(),
                max_connections: 10,
                busy_timeout_secs: 5,
            },
            gateway: GatewayConfig {
                callback_token: String::new(),
                secret_key: None,
                api_base_url: "https://api.xendit.co".to_string(),
                currency: "IDR".to_string(),
                admin_fee: 0,
                test_reference_id: "invoice_123124123".to_string(),
                success_redirect_url: None,
                failure_redirect_url: None,
                invoice_duration_secs: 86400,
            },
            reconciler: ReconcilerConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}
