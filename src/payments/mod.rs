use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub mod xendit_client;

pub use xendit_client::{UnconfiguredGateway, XenditClient};

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    /// Our transaction id; the gateway echoes it back in webhooks.
    pub external_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub invoice_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub invoice_id: String,
    pub reference_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub reason: String,
    /// Sent as the gateway's idempotency header. Retrying with the same key
    /// returns the original refund instead of creating a second one.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RefundReceipt {
    pub id: String,
    pub status: String,
}

/// Outbound calls to the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice>;
    async fn create_refund(&self, request: RefundRequest) -> Result<RefundReceipt>;
}
