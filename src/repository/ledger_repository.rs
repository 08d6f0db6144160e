use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    domain::{
        transition, ETicket, GatewayStatus, Order, OrderStatus, PaymentStatus, TicketAction, Transaction,
        TransactionSnapshot, Transition, WebhookFlow,
    },
    error::{AppError, Result},
    repository::{
        order_repository, ticket_repository, transaction_repository, PaymentLedger,
        TransactionalExecutor,
    },
};

/// Committed result of one gateway callback.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub transaction: Transaction,
    pub orders: Vec<Order>,
    pub tickets: Vec<ETicket>,
    /// False when the callback was a no-op (unknown status or replay).
    pub applied: bool,
    /// The payment is captured but every order is cancelled and nothing has
    /// been refunded yet.
    pub refund_due: bool,
}

fn needs_refund(transaction: &Transaction, orders: &[Order], has_refund: bool) -> bool {
    transaction.payment_status == PaymentStatus::Success
        && !has_refund
        && !orders.is_empty()
        && orders.iter().all(|o| o.order_status == OrderStatus::Cancelled)
}

pub struct SqlitePaymentLedger {
    executor: TransactionalExecutor,
}

impl SqlitePaymentLedger {
    pub fn new(executor: TransactionalExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl PaymentLedger for SqlitePaymentLedger {
    async fn apply_gateway_status(
        &self,
        transaction_id: Uuid,
        flow: WebhookFlow,
        status: &GatewayStatus,
    ) -> Result<Reconciliation> {
        let status = status.clone();
        self.executor
            .run(move |conn| {
                Box::pin(async move {
                    let loaded = transaction_repository::find_with_relations(conn, transaction_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("Transaction {} not found", transaction_id))
                        })?;

                    let snapshot = TransactionSnapshot {
                        payment_status: loaded.transaction.payment_status,
                        has_cancellation: loaded.cancellation.is_some(),
                        has_refund: loaded.refund.is_some(),
                    };

                    let target = match transition(flow, snapshot, &status) {
                        Transition::Apply(target) => target,
                        Transition::NoOp => {
                            tracing::info!(
                                "Gateway status {:?} is a no-op for transaction {} ({})",
                                status,
                                transaction_id,
                                snapshot.payment_status.as_str()
                            );
                            let mut tickets = Vec::new();
                            for order in &loaded.orders {
                                if let Some(ticket) = ticket_repository::find_by_order(conn, order.id).await? {
                                    tickets.push(ticket);
                                }
                            }
                            let refund_due =
                                needs_refund(&loaded.transaction, &loaded.orders, loaded.refund.is_some());
                            return Ok(Reconciliation {
                                transaction: loaded.transaction,
                                orders: loaded.orders,
                                tickets,
                                applied: false,
                                refund_due,
                            });
                        }
                    };

                    if snapshot.payment_status.is_closed() && target.payment_status == PaymentStatus::Success {
                        tracing::error!(
                            "Payment captured for transaction {} after it was {}; orders stay cancelled pending refund",
                            transaction_id,
                            snapshot.payment_status.as_str()
                        );
                    }

                    match (target.payment_status, &loaded.refund) {
                        (PaymentStatus::Refunded, Some(refund)) => {
                            transaction_repository::mark_refunded(conn, transaction_id, refund.amount, refund.created_at)
                                .await?;
                        }
                        _ => {
                            transaction_repository::update_payment_status(conn, transaction_id, target.payment_status)
                                .await?;
                        }
                    }
                    order_repository::update_status_for_transaction(
                        conn,
                        transaction_id,
                        target.order_status,
                        target.work_status,
                    )
                    .await?;

                    let mut tickets = Vec::new();
                    if target.ticket_action == TicketAction::IssueTicket {
                        for order in &loaded.orders {
                            tickets.push(ticket_repository::issue(conn, order.user_id, order.id).await?);
                        }
                    }

                    // Re-read so the caller gets exactly what was committed.
                    let transaction = transaction_repository::find_by_id(conn, transaction_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::Database("Failed to retrieve updated transaction".to_string())
                        })?;
                    let orders = order_repository::list_by_transaction(conn, transaction_id).await?;
                    let refund_due = needs_refund(&transaction, &orders, loaded.refund.is_some());

                    Ok(Reconciliation {
                        transaction,
                        orders,
                        tickets,
                        applied: true,
                        refund_due,
                    })
                })
            })
            .await
    }
}
