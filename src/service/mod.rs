pub mod order_service;
pub mod refund_service;
pub mod retry;
pub mod webhook_service;

use std::sync::Arc;
use sqlx::SqlitePool;

use crate::config::Settings;
use crate::notifications::{BroadcastPushChannel, NotificationDispatcher, PushHandle};
use crate::payments::PaymentGateway;
use crate::repository::{PaymentLedger, SqlitePaymentLedger, TransactionalExecutor};
use order_service::OrderService;
use refund_service::RefundService;
use retry::RetryPolicy;
use webhook_service::WebhookReconciler;

pub use order_service::{CancellationReceipt, CheckoutReceipt, CheckoutRequest, OrderDetails};
pub use webhook_service::{GatewayCallback, InvoiceCallback, PaymentRequestCallback, WebhookOutcome};

pub struct ServiceContext {
    /// Present when notifications are enabled; the SSE stream subscribes to it.
    pub push_channel: Option<Arc<BroadcastPushChannel>>,
    pub webhook_reconciler: Arc<WebhookReconciler>,
    pub order_service: Arc<OrderService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        push_channel: Option<Arc<BroadcastPushChannel>>,
        settings: &Settings,
    ) -> Self {
        let executor = TransactionalExecutor::new(
            db_pool.clone(),
            settings.reconciler.transaction_timeout(),
        );
        let ledger: Arc<dyn PaymentLedger> = Arc::new(SqlitePaymentLedger::new(executor.clone()));
        Self::with_ledger(db_pool, executor, ledger, gateway, push_channel, settings)
    }

    /// Same wiring with a caller-supplied ledger.
    pub fn with_ledger(
        db_pool: SqlitePool,
        executor: TransactionalExecutor,
        ledger: Arc<dyn PaymentLedger>,
        gateway: Arc<dyn PaymentGateway>,
        push_channel: Option<Arc<BroadcastPushChannel>>,
        settings: &Settings,
    ) -> Self {
        let handle = match &push_channel {
            Some(channel) => PushHandle::ready(channel.clone()),
            None => PushHandle::Uninitialized,
        };
        let dispatcher = NotificationDispatcher::new(handle);
        let retry = RetryPolicy::from_config(&settings.reconciler);
        let refunds = Arc::new(RefundService::new(
            executor.clone(),
            gateway.clone(),
            settings.gateway.currency.clone(),
        ));

        let webhook_reconciler = Arc::new(
            WebhookReconciler::new(
                ledger,
                dispatcher.clone(),
                settings.gateway.callback_token.clone(),
                settings.gateway.test_reference_id.clone(),
                retry,
            )
            .with_refunds(refunds.clone()),
        );

        let order_service = Arc::new(OrderService::new(
            executor,
            gateway,
            refunds,
            dispatcher,
            retry,
            settings.gateway.admin_fee,
            settings.gateway.currency.clone(),
        ));

        Self {
            push_channel,
            webhook_reconciler,
            order_service,
            db_pool,
        }
    }
}
