use async_trait::async_trait;
use serde_json::json;

use crate::{
    config::GatewayConfig,
    error::{AppError, Result},
    payments::{Invoice, InvoiceRequest, PaymentGateway, RefundReceipt, RefundRequest},
};

/// REST client for the Xendit invoice and refund APIs.
pub struct XenditClient {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
    success_redirect_url: Option<String>,
    failure_redirect_url: Option<String>,
    invoice_duration_secs: u64,
}

impl XenditClient {
    pub fn new(config: &GatewayConfig) -> Option<Self> {
        let secret_key = config.secret_key.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            secret_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            success_redirect_url: config.success_redirect_url.clone(),
            failure_redirect_url: config.failure_redirect_url.clone(),
            invoice_duration_secs: config.invoice_duration_secs,
        })
    }

    async fn read_json(response: reqwest::Response, what: &str) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("Gateway {} response unreadable: {}", what, e)))?;

        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("unknown error");
            return Err(AppError::External(format!(
                "Gateway {} failed with {}: {}",
                what, status, message
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl PaymentGateway for XenditClient {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice> {
        let mut body = json!({
            "external_id": request.external_id.to_string(),
            "amount": request.amount,
            "currency": request.currency,
            "description": request.description,
            "invoice_duration": self.invoice_duration_secs,
        });
        if let Some(url) = &self.success_redirect_url {
            body["success_redirect_url"] = json!(url);
        }
        if let Some(url) = &self.failure_redirect_url {
            body["failure_redirect_url"] = json!(url);
        }

        let response = self
            .client
            .post(format!("{}/v2/invoices", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::External(format!("Gateway invoice request failed: {}", e)))?;

        let body = Self::read_json(response, "invoice").await?;
        serde_json::from_value(body)
            .map_err(|e| AppError::External(format!("Unexpected invoice payload: {}", e)))
    }

    async fn create_refund(&self, request: RefundRequest) -> Result<RefundReceipt> {
        let body = json!({
            "invoice_id": request.invoice_id,
            "reference_id": request.reference_id.to_string(),
            "amount": request.amount,
            "currency": request.currency,
            "reason": request.reason,
        });

        let response = self
            .client
            .post(format!("{}/refunds", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::External(format!("Gateway refund request failed: {}", e)))?;

        let body = Self::read_json(response, "refund").await?;
        tracing::info!(
            "Refund {} accepted for transaction {}",
            body["id"].as_str().unwrap_or("?"),
            request.reference_id
        );
        serde_json::from_value(body)
            .map_err(|e| AppError::External(format!("Unexpected refund payload: {}", e)))
    }
}

/// Stand-in used when no secret key is configured. Every call fails.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_invoice(&self, _request: InvoiceRequest) -> Result<Invoice> {
        Err(AppError::External("Payment gateway not configured".to_string()))
    }

    async fn create_refund(&self, _request: RefundRequest) -> Result<RefundReceipt> {
        Err(AppError::External("Payment gateway not configured".to_string()))
    }
}
