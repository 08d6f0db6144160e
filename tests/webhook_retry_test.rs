use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bodyshop::{
    domain::{GatewayStatus, PaymentStatus, Transaction, WebhookFlow},
    error::{AppError, Result},
    notifications::NotificationDispatcher,
    repository::{PaymentLedger, Reconciliation},
    service::{retry::RetryPolicy, webhook_service::WebhookReconciler, GatewayCallback, WebhookOutcome},
};
use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

/// Fails with lock contention until `failures` attempts have been made.
struct FlakyLedger {
    failures: u32,
    attempts: AtomicU32,
    commits: AtomicU32,
}

impl FlakyLedger {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            commits: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PaymentLedger for FlakyLedger {
    async fn apply_gateway_status(
        &self,
        transaction_id: Uuid,
        _flow: WebhookFlow,
        _status: &GatewayStatus,
    ) -> Result<Reconciliation> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(AppError::Transient("database is locked".to_string()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(Reconciliation {
            transaction: Transaction {
                id: transaction_id,
                user_id: Uuid::new_v4(),
                payment_method_id: Uuid::new_v4(),
                admin_fee: 0,
                payment_method_fee: 0,
                total_price: 10_000,
                payment_status: PaymentStatus::Success,
                invoice_id: None,
                payment_invoice_url: None,
                refund_amount: None,
                refunded_at: None,
                created_at: now,
                updated_at: now,
            },
            orders: Vec::new(),
            tickets: Vec::new(),
            applied: true,
            refund_due: false,
        })
    }
}

fn reconciler(ledger: Arc<FlakyLedger>) -> WebhookReconciler {
    WebhookReconciler::new(
        ledger,
        NotificationDispatcher::default(),
        "token".to_string(),
        "invoice_123124123".to_string(),
        RetryPolicy::default(),
    )
}

fn paid(transaction_id: Uuid) -> GatewayCallback {
    GatewayCallback {
        flow: WebhookFlow::Invoice,
        reference_id: transaction_id.to_string(),
        status: "PAID".to_string(),
        occurred_at: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_contended_webhook_commits_on_third_attempt() -> anyhow::Result<()> {
    let ledger = Arc::new(FlakyLedger::new(2));
    let started = Instant::now();

    let outcome = reconciler(ledger.clone()).handle(Some("token"), paid(Uuid::new_v4())).await?;

    assert!(matches!(outcome, WebhookOutcome::Reconciled(ref r) if r.applied));
    assert_eq!(ledger.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() >= Duration::from_secs(6));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_internal_error() -> anyhow::Result<()> {
    let ledger = Arc::new(FlakyLedger::new(u32::MAX));

    let err = reconciler(ledger.clone())
        .handle(Some("token"), paid(Uuid::new_v4()))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Internal(_)));
    assert_eq!(ledger.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_malformed_reference_is_retried_then_rejected() -> anyhow::Result<()> {
    let ledger = Arc::new(FlakyLedger::new(0));
    let callback = GatewayCallback {
        reference_id: "not-a-uuid".to_string(),
        ..paid(Uuid::new_v4())
    };

    let err = reconciler(ledger.clone()).handle(Some("token"), callback).await.unwrap_err();

    assert!(matches!(err, AppError::Internal(_)));
    assert_eq!(ledger.attempts.load(Ordering::SeqCst), 0);
    Ok(())
}
