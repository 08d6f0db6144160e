use async_trait::async_trait;
use uuid::Uuid;
use crate::domain::*;
use crate::error::Result;

pub mod executor;
pub mod ledger_repository;
pub mod order_repository;
pub mod pool;
pub mod ticket_repository;
pub mod transaction_repository;

pub use executor::TransactionalExecutor;
pub use ledger_repository::{Reconciliation, SqlitePaymentLedger};
pub use transaction_repository::TransactionWithRelations;

/// Store seam used by the webhook reconciler.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Load the transaction with its orders, cancellation and refund, run the
    /// gateway state machine and commit the result as one unit of work.
    ///
    /// Fails with `NotFound` when no transaction has `transaction_id`.
    async fn apply_gateway_status(
        &self,
        transaction_id: Uuid,
        flow: WebhookFlow,
        status: &GatewayStatus,
    ) -> Result<Reconciliation>;
}
