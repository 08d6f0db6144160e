use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    domain::{PaymentStatus, Refund, Transaction},
    error::{AppError, Result},
    payments::{PaymentGateway, RefundRequest},
    repository::{transaction_repository, TransactionalExecutor},
};

/// Full refunds through the gateway. Every request for a transaction carries
/// the same idempotency key, so repeating one never pays out twice.
pub struct RefundService {
    executor: TransactionalExecutor,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl RefundService {
    pub fn new(executor: TransactionalExecutor, gateway: Arc<dyn PaymentGateway>, currency: String) -> Self {
        Self {
            executor,
            gateway,
            currency,
        }
    }

    /// Ask the gateway to return the whole amount of `transaction`. Nothing is
    /// stored; the caller records the refund in its own unit of work.
    pub async fn request(&self, transaction: &Transaction, reason: &str) -> Result<Refund> {
        let invoice_id = transaction
            .invoice_id
            .clone()
            .ok_or_else(|| AppError::Conflict("Paid transaction has no gateway invoice".to_string()))?;
        let idempotency_key = Refund::key_for(transaction.id);

        let receipt = self
            .gateway
            .create_refund(RefundRequest {
                invoice_id,
                reference_id: transaction.id,
                amount: transaction.total_price,
                currency: self.currency.clone(),
                reason: reason.to_string(),
                idempotency_key: idempotency_key.clone(),
            })
            .await?;

        tracing::info!(
            "Gateway refund {} ({}) requested for transaction {}",
            receipt.id,
            receipt.status,
            transaction.id
        );

        Ok(Refund {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            idempotency_key,
            gateway_refund_id: receipt.id,
            amount: transaction.total_price,
            created_at: Utc::now(),
        })
    }

    /// Return a payment captured after its orders were cancelled and mark the
    /// transaction REFUNDED. Returns the stored transaction.
    pub async fn refund_captured(&self, transaction: &Transaction) -> Result<Transaction> {
        let refund = self.request(transaction, "CANCELLATION").await?;
        let transaction_id = transaction.id;

        self.executor
            .run(move |conn| {
                Box::pin(async move {
                    let current = transaction_repository::find_by_id(conn, transaction_id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", transaction_id)))?;
                    if current.payment_status != PaymentStatus::Success {
                        return Ok(current);
                    }

                    transaction_repository::insert_refund(conn, &refund).await?;
                    transaction_repository::mark_refunded(conn, transaction_id, refund.amount, refund.created_at)
                        .await?;

                    transaction_repository::find_by_id(conn, transaction_id)
                        .await?
                        .ok_or_else(|| AppError::Database("Failed to retrieve refunded transaction".to_string()))
                })
            })
            .await
    }
}
