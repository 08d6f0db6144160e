use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::*,
    error::{AppError, Result},
    notifications::NotificationDispatcher,
    payments::{InvoiceRequest, PaymentGateway},
    repository::{order_repository, ticket_repository, transaction_repository, TransactionalExecutor},
    service::{refund_service::RefundService, retry::RetryPolicy},
};

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub user_car_id: Uuid,
    pub workshop_id: Uuid,
    pub service_ids: Vec<Uuid>,
    pub payment_method_id: Uuid,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub transaction: Transaction,
    pub order: Order,
    pub services: Vec<OrderServiceLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationReceipt {
    pub order: Order,
    pub transaction: Transaction,
    pub refund: Option<Refund>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub transaction: Transaction,
    pub services: Vec<OrderServiceLine>,
    pub ticket: Option<ETicket>,
}

/// User-facing order lifecycle: checkout, cancellation and work progress.
pub struct OrderService {
    executor: TransactionalExecutor,
    gateway: Arc<dyn PaymentGateway>,
    refunds: Arc<RefundService>,
    dispatcher: NotificationDispatcher,
    retry: RetryPolicy,
    admin_fee: i64,
    currency: String,
}

impl OrderService {
    pub fn new(
        executor: TransactionalExecutor,
        gateway: Arc<dyn PaymentGateway>,
        refunds: Arc<RefundService>,
        dispatcher: NotificationDispatcher,
        retry: RetryPolicy,
        admin_fee: i64,
        currency: String,
    ) -> Self {
        Self {
            executor,
            gateway,
            refunds,
            dispatcher,
            retry,
            admin_fee,
            currency,
        }
    }

    /// Price the selected services, persist a PENDING transaction with one
    /// order, then open a gateway invoice for it.
    pub async fn checkout(&self, actor: &Actor, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        let mut service_ids = request.service_ids.clone();
        service_ids.sort();
        service_ids.dedup();
        if service_ids.is_empty() {
            return Err(AppError::BadRequest("At least one service is required".to_string()));
        }

        let user_id = actor.user_id;
        let admin_fee = self.admin_fee;

        let mut receipt = self
            .retry
            .run("Checkout", AppError::is_transient, |_| {
                let request = request.clone();
                let service_ids = service_ids.clone();
                self.executor.run(move |conn| {
                    Box::pin(async move {
                        let services =
                            order_repository::find_workshop_services(conn, request.workshop_id, &service_ids).await?;
                        if services.len() != service_ids.len() {
                            return Err(AppError::BadRequest(
                                "One or more services are not offered by this workshop".to_string(),
                            ));
                        }

                        let method_fee = order_repository::find_payment_method_fee(conn, request.payment_method_id)
                            .await?
                            .ok_or_else(|| AppError::BadRequest("Unknown payment method".to_string()))?;

                        let subtotal = services
                            .iter()
                            .try_fold(0i64, |acc, service| acc.checked_add(service.price))
                            .ok_or_else(|| AppError::BadRequest("Order total is too large".to_string()))?;
                        let total = subtotal
                            .checked_add(admin_fee)
                            .and_then(|t| t.checked_add(method_fee))
                            .ok_or_else(|| AppError::BadRequest("Order total is too large".to_string()))?;

                        let now = Utc::now();
                        let transaction = Transaction {
                            id: Uuid::new_v4(),
                            user_id,
                            payment_method_id: request.payment_method_id,
                            admin_fee,
                            payment_method_fee: method_fee,
                            total_price: total,
                            payment_status: PaymentStatus::Pending,
                            invoice_id: None,
                            payment_invoice_url: None,
                            refund_amount: None,
                            refunded_at: None,
                            created_at: now,
                            updated_at: now,
                        };
                        transaction_repository::insert(conn, &transaction).await?;

                        let order = Order {
                            id: Uuid::new_v4(),
                            user_id,
                            user_car_id: request.user_car_id,
                            workshop_id: request.workshop_id,
                            transaction_id: transaction.id,
                            order_status: OrderStatus::Pending,
                            work_status: WorkStatus::Inspection,
                            note: request.note.clone(),
                            total_price: subtotal,
                            created_at: now,
                            updated_at: now,
                        };
                        order_repository::insert(conn, &order).await?;

                        let mut lines = Vec::with_capacity(services.len());
                        for service in services {
                            let line = OrderServiceLine {
                                order_id: order.id,
                                service_id: transaction_repository::parse_uuid(&service.id)?,
                                name: service.name,
                                price: service.price,
                            };
                            order_repository::insert_service_line(conn, &line).await?;
                            lines.push(line);
                        }

                        Ok(CheckoutReceipt {
                            transaction,
                            order,
                            services: lines,
                        })
                    })
                })
            })
            .await?;

        let transaction_id = receipt.transaction.id;
        let invoice = self
            .gateway
            .create_invoice(InvoiceRequest {
                external_id: transaction_id,
                amount: receipt.transaction.total_price,
                currency: self.currency.clone(),
                description: format!("Workshop order {}", receipt.order.id),
            })
            .await;

        let invoice = match invoice {
            Ok(invoice) => invoice,
            Err(e) => {
                tracing::error!("Invoice creation failed for transaction {}: {}", transaction_id, e);
                let abandoned = self
                    .executor
                    .run(move |conn| {
                        Box::pin(async move {
                            transaction_repository::update_payment_status(conn, transaction_id, PaymentStatus::Failed)
                                .await?;
                            order_repository::update_status_for_transaction(
                                conn,
                                transaction_id,
                                OrderStatus::Cancelled,
                                Some(WorkStatus::Cancelled),
                            )
                            .await?;
                            Ok(())
                        })
                    })
                    .await;
                if let Err(cleanup) = abandoned {
                    tracing::error!("Could not fail transaction {}: {}", transaction_id, cleanup);
                }
                return Err(e);
            }
        };

        let (invoice_id, invoice_url) = (invoice.id.clone(), invoice.invoice_url.clone());
        self.executor
            .run(move |conn| {
                Box::pin(async move {
                    transaction_repository::set_invoice(conn, transaction_id, &invoice_id, &invoice_url).await
                })
            })
            .await?;

        receipt.transaction.invoice_id = Some(invoice.id);
        receipt.transaction.payment_invoice_url = Some(invoice.invoice_url);

        tracing::info!(
            "Checkout created transaction {} for user {} ({} minor units)",
            transaction_id,
            user_id,
            receipt.transaction.total_price
        );

        Ok(receipt)
    }

    /// Cancel an order on behalf of its owner.
    ///
    /// A pending payment is failed. A successful one is refunded through the
    /// gateway first, keyed by the transaction id, and only then are the order
    /// and transaction flipped in one unit of work. A failed refund call
    /// leaves everything untouched.
    pub async fn cancel_order(&self, actor: &Actor, order_id: Uuid, reason: Option<String>) -> Result<CancellationReceipt> {
        let mut conn = self.executor.pool().acquire().await?;
        let order = order_repository::find_by_id(&mut conn, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
        if order.user_id != actor.user_id {
            return Err(AppError::Forbidden);
        }
        if !order.is_cancellable() {
            return Err(AppError::Conflict(format!(
                "Order is already {}",
                order.order_status.as_str()
            )));
        }
        let transaction = transaction_repository::find_by_id(&mut conn, order.transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))?;
        let recorded_refund =
            transaction_repository::find_refund_by_key(&mut conn, &Refund::key_for(transaction.id)).await?;
        drop(conn);

        let refund = match (transaction.payment_status, recorded_refund) {
            (PaymentStatus::Success, Some(existing)) => Some(existing),
            (PaymentStatus::Success, None) => Some(self.refunds.request(&transaction, "CANCELLATION").await?),
            _ => None,
        };

        let user_id = actor.user_id;
        let (order, transaction) = self
            .retry
            .run("Order cancellation", AppError::is_transient, |_| {
                let reason = reason.clone();
                let refund = refund.clone();
                self.executor.run(move |conn| {
                    Box::pin(async move {
                        let order = order_repository::find_by_id(conn, order_id)
                            .await?
                            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
                        if !order.is_cancellable() {
                            return Err(AppError::Conflict(format!(
                                "Order is already {}",
                                order.order_status.as_str()
                            )));
                        }
                        let transaction = transaction_repository::find_by_id(conn, order.transaction_id)
                            .await?
                            .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))?;

                        transaction_repository::insert_cancellation(
                            conn,
                            &Cancellation {
                                id: Uuid::new_v4(),
                                transaction_id: transaction.id,
                                order_id,
                                user_id,
                                reason,
                                created_at: Utc::now(),
                            },
                        )
                        .await?;
                        order_repository::update_status(
                            conn,
                            order_id,
                            OrderStatus::Cancelled,
                            Some(WorkStatus::Cancelled),
                        )
                        .await?;

                        match (transaction.payment_status, refund) {
                            (PaymentStatus::Pending, _) => {
                                transaction_repository::update_payment_status(
                                    conn,
                                    transaction.id,
                                    PaymentStatus::Failed,
                                )
                                .await?;
                                cancel_siblings(conn, transaction.id).await?;
                            }
                            (PaymentStatus::Success, Some(refund)) => {
                                transaction_repository::insert_refund(conn, &refund).await?;
                                transaction_repository::mark_refunded(conn, transaction.id, refund.amount, Utc::now())
                                    .await?;
                                cancel_siblings(conn, transaction.id).await?;
                            }
                            (PaymentStatus::Success, None) => {
                                // Paid between the pre-check and this unit; the
                                // caller has to go through the refund path.
                                return Err(AppError::Conflict(
                                    "Payment settled while cancelling, please retry".to_string(),
                                ));
                            }
                            _ => {}
                        }

                        let order = order_repository::find_by_id(conn, order_id)
                            .await?
                            .ok_or_else(|| AppError::Database("Failed to retrieve cancelled order".to_string()))?;
                        let transaction = transaction_repository::find_by_id(conn, order.transaction_id)
                            .await?
                            .ok_or_else(|| AppError::Database("Failed to retrieve transaction".to_string()))?;
                        Ok((order, transaction))
                    })
                })
            })
            .await?;

        tracing::info!(
            "Order {} cancelled by user {}; payment is {}",
            order.id,
            user_id,
            transaction.payment_status.as_str()
        );

        self.dispatcher.order_status_changed(&order).await;
        self.dispatcher.payment_status_changed(&transaction).await;

        Ok(CancellationReceipt {
            order,
            transaction,
            refund,
        })
    }

    /// Advance the repair pipeline of an order. Only the workshop's admins
    /// (or super admins) may do this, and only forward.
    pub async fn update_work_status(&self, actor: &Actor, order_id: Uuid, work_status: WorkStatus) -> Result<Order> {
        let actor = actor.clone();
        let (before, after) = self
            .retry
            .run("Work status update", AppError::is_transient, |_| {
                let actor = actor.clone();
                self.executor.run(move |conn| {
                    Box::pin(async move {
                        let order = order_repository::find_by_id(conn, order_id)
                            .await?
                            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
                        if !actor.administers(order.workshop_id) {
                            return Err(AppError::Forbidden);
                        }
                        if !order.order_status.allows_work_progress() {
                            return Err(AppError::Conflict(format!(
                                "Work cannot progress while the order is {}",
                                order.order_status.as_str()
                            )));
                        }
                        if !order.work_status.can_advance_to(work_status) {
                            return Err(AppError::BadRequest(format!(
                                "Cannot move work status from {} to {}",
                                order.work_status.as_str(),
                                work_status.as_str()
                            )));
                        }

                        let order_status = if work_status == WorkStatus::Done {
                            OrderStatus::Completed
                        } else {
                            OrderStatus::Processing
                        };
                        order_repository::update_status(conn, order_id, order_status, Some(work_status)).await?;

                        let updated = order_repository::find_by_id(conn, order_id)
                            .await?
                            .ok_or_else(|| AppError::Database("Failed to retrieve updated order".to_string()))?;
                        Ok((order, updated))
                    })
                })
            })
            .await?;

        self.dispatcher.work_status_changed(&after).await;
        if before.order_status != after.order_status {
            self.dispatcher.order_status_changed(&after).await;
        }

        Ok(after)
    }

    /// Order with its transaction, priced lines and ticket. Visible to the
    /// owner and to admins of the order's workshop.
    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetails> {
        let mut conn = self.executor.pool().acquire().await?;
        let order = order_repository::find_by_id(&mut conn, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
        if order.user_id != actor.user_id && !actor.administers(order.workshop_id) {
            return Err(AppError::Forbidden);
        }

        let transaction = transaction_repository::find_by_id(&mut conn, order.transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))?;
        let services = order_repository::list_service_lines(&mut conn, order_id).await?;
        let ticket = ticket_repository::find_by_order(&mut conn, order_id).await?;

        Ok(OrderDetails {
            order,
            transaction,
            services,
            ticket,
        })
    }
}

/// A transaction that stops being payable takes all its orders with it.
async fn cancel_siblings(conn: &mut sqlx::SqliteConnection, transaction_id: Uuid) -> Result<()> {
    order_repository::update_status_for_transaction(
        conn,
        transaction_id,
        OrderStatus::Cancelled,
        Some(WorkStatus::Cancelled),
    )
    .await?;
    Ok(())
}
