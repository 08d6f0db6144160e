use std::sync::Arc;

use serde::Deserialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    domain::{GatewayStatus, WebhookFlow},
    error::{AppError, Result},
    notifications::NotificationDispatcher,
    repository::{PaymentLedger, Reconciliation},
    service::{refund_service::RefundService, retry::RetryPolicy},
};

/// Invoice-level callback body.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceCallback {
    #[serde(default)]
    pub id: Option<String>,
    pub external_id: String,
    pub status: String,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

/// Payment-request-level callback body.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequestCallback {
    #[serde(default)]
    pub event: Option<String>,
    pub data: PaymentRequestData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequestData {
    #[serde(default)]
    pub payment_request_id: Option<String>,
    pub reference_id: String,
    pub status: String,
    #[serde(default)]
    pub updated: Option<String>,
}

/// Either callback shape reduced to what reconciliation consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCallback {
    pub flow: WebhookFlow,
    pub reference_id: String,
    pub status: String,
    pub occurred_at: Option<String>,
}

impl From<InvoiceCallback> for GatewayCallback {
    fn from(callback: InvoiceCallback) -> Self {
        Self {
            flow: WebhookFlow::Invoice,
            reference_id: callback.external_id,
            status: callback.status,
            occurred_at: callback.paid_at.or(callback.updated),
        }
    }
}

impl From<PaymentRequestCallback> for GatewayCallback {
    fn from(callback: PaymentRequestCallback) -> Self {
        Self {
            flow: WebhookFlow::PaymentRequest,
            reference_id: callback.data.reference_id,
            status: callback.data.status,
            occurred_at: callback.data.updated,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// The gateway's dashboard test ping; storage was not touched.
    TestPing,
    Reconciled(Reconciliation),
}

/// Turns authenticated gateway callbacks into committed state changes.
pub struct WebhookReconciler {
    ledger: Arc<dyn PaymentLedger>,
    dispatcher: NotificationDispatcher,
    callback_token: String,
    test_reference_id: String,
    retry: RetryPolicy,
    refunds: Option<Arc<RefundService>>,
}

impl WebhookReconciler {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        dispatcher: NotificationDispatcher,
        callback_token: String,
        test_reference_id: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            callback_token,
            test_reference_id,
            retry,
            refunds: None,
        }
    }

    /// Refund payments that are captured after their orders were cancelled.
    pub fn with_refunds(mut self, refunds: Arc<RefundService>) -> Self {
        self.refunds = Some(refunds);
        self
    }

    /// Constant-time comparison of the callback token header.
    pub fn authenticate(&self, token: Option<&str>) -> Result<()> {
        let Some(token) = token else {
            return Err(AppError::Unauthorized);
        };
        if self.callback_token.is_empty() {
            return Err(AppError::Unauthorized);
        }
        if bool::from(token.as_bytes().ct_eq(self.callback_token.as_bytes())) {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    #[tracing::instrument(
        name = "webhook",
        skip_all,
        fields(flow = callback.flow.as_str(), reference_id = %callback.reference_id, status = %callback.status)
    )]
    pub async fn handle(&self, token: Option<&str>, callback: GatewayCallback) -> Result<WebhookOutcome> {
        if let Err(e) = self.authenticate(token) {
            tracing::warn!("Rejected webhook with invalid callback token");
            return Err(e);
        }

        if callback.reference_id == self.test_reference_id {
            tracing::info!("Gateway test webhook acknowledged");
            return Ok(WebhookOutcome::TestPing);
        }

        let status = GatewayStatus::parse(callback.flow, &callback.status);
        let flow = callback.flow;
        let reference_id = callback.reference_id.as_str();
        let ledger = &self.ledger;
        let status_ref = &status;

        let result = self
            .retry
            .run("Webhook reconciliation", |_| true, |_| async move {
                let transaction_id = Uuid::parse_str(reference_id)
                    .map_err(|_| AppError::NotFound(format!("Transaction {} not found", reference_id)))?;
                ledger.apply_gateway_status(transaction_id, flow, status_ref).await
            })
            .await;

        let mut reconciliation = match result {
            Ok(reconciliation) => reconciliation,
            Err(e) => {
                tracing::error!(
                    "Webhook reconciliation failed after {} attempts: {}",
                    self.retry.max_attempts,
                    e
                );
                return Err(AppError::Internal(format!("Webhook reconciliation failed: {}", e)));
            }
        };

        if reconciliation.refund_due {
            reconciliation = self.refund_captured(reconciliation).await?;
        }

        if reconciliation.applied {
            tracing::info!(
                "Transaction {} is now {} ({} ticket(s) issued)",
                reconciliation.transaction.id,
                reconciliation.transaction.payment_status.as_str(),
                reconciliation.tickets.len()
            );
            self.notify(&reconciliation).await;
        }

        Ok(WebhookOutcome::Reconciled(reconciliation))
    }

    /// A failed refund is an error so the gateway redelivers the callback,
    /// which finds the refund still due and tries again.
    async fn refund_captured(&self, mut reconciliation: Reconciliation) -> Result<Reconciliation> {
        let transaction_id = reconciliation.transaction.id;
        let Some(refunds) = &self.refunds else {
            tracing::error!(
                "Transaction {} holds a payment for cancelled orders and no refund path is configured",
                transaction_id
            );
            return Ok(reconciliation);
        };

        match refunds.refund_captured(&reconciliation.transaction).await {
            Ok(transaction) => {
                tracing::warn!(
                    "Refunded {} minor units captured after cancellation of transaction {}",
                    reconciliation.transaction.total_price,
                    transaction_id
                );
                reconciliation.transaction = transaction;
                reconciliation.refund_due = false;
                reconciliation.applied = true;
                Ok(reconciliation)
            }
            Err(e) => {
                tracing::error!("Refund for transaction {} failed: {}", transaction_id, e);
                Err(AppError::Internal(format!("Refund of captured payment failed: {}", e)))
            }
        }
    }

    async fn notify(&self, reconciliation: &Reconciliation) {
        for order in &reconciliation.orders {
            self.dispatcher.order_status_changed(order).await;
        }
        self.dispatcher
            .payment_status_changed(&reconciliation.transaction)
            .await;
    }
}
