mod common;

use std::sync::atomic::Ordering;

use bodyshop::{
    domain::{OrderStatus, PaymentStatus, WebhookFlow, WorkStatus},
    error::AppError,
    service::{CheckoutRequest, GatewayCallback, WebhookOutcome},
};
use common::*;
use sqlx::SqlitePool;
use uuid::Uuid;

fn invoice_callback(transaction_id: Uuid, status: &str) -> GatewayCallback {
    GatewayCallback {
        flow: WebhookFlow::Invoice,
        reference_id: transaction_id.to_string(),
        status: status.to_string(),
        occurred_at: None,
    }
}

async fn count(pool: &SqlitePool, table: &str) -> anyhow::Result<i64> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[tokio::test]
async fn test_checkout_prices_services_and_fees() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let workshop_id = Uuid::new_v4();
    let paint = seed_service(&app.pool, workshop_id, "Full repaint", 100_000).await?;
    let polish = seed_service(&app.pool, workshop_id, "Polishing", 50_000).await?;
    let method = seed_payment_method(&app.pool, 4_000).await?;
    let actor = customer();

    let receipt = app
        .context
        .order_service
        .checkout(
            &actor,
            CheckoutRequest {
                user_car_id: Uuid::new_v4(),
                workshop_id,
                service_ids: vec![paint, polish, paint],
                payment_method_id: method,
                note: Some("Scratch on the left door".to_string()),
            },
        )
        .await?;

    assert_eq!(receipt.order.total_price, 150_000);
    assert_eq!(receipt.transaction.total_price, 156_500);
    assert_eq!(receipt.transaction.payment_status, PaymentStatus::Pending);
    assert_eq!(receipt.order.order_status, OrderStatus::Pending);
    assert_eq!(receipt.order.work_status, WorkStatus::Inspection);
    assert_eq!(receipt.services.len(), 2);
    assert_eq!(
        receipt.transaction.invoice_id.as_deref(),
        Some(format!("inv-{}", receipt.transaction.id).as_str())
    );

    let (stored_tx, _) = load(&app.pool, receipt.transaction.id, receipt.order.id).await?;
    assert!(stored_tx.payment_invoice_url.is_some());
    assert_eq!(app.gateway.invoice_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_checkout_rejects_foreign_service() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let workshop_id = Uuid::new_v4();
    let foreign = seed_service(&app.pool, Uuid::new_v4(), "Detailing", 30_000).await?;
    let method = seed_payment_method(&app.pool, 0).await?;

    let err = app
        .context
        .order_service
        .checkout(
            &customer(),
            CheckoutRequest {
                user_car_id: Uuid::new_v4(),
                workshop_id,
                service_ids: vec![foreign],
                payment_method_id: method,
                note: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(count(&app.pool, "transactions").await?, 0);
    assert_eq!(app.gateway.invoice_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_checkout_invoice_failure_fails_transaction() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let workshop_id = Uuid::new_v4();
    let service = seed_service(&app.pool, workshop_id, "Bumper repair", 80_000).await?;
    let method = seed_payment_method(&app.pool, 0).await?;
    app.gateway.fail_invoices.store(true, Ordering::SeqCst);

    let err = app
        .context
        .order_service
        .checkout(
            &customer(),
            CheckoutRequest {
                user_car_id: Uuid::new_v4(),
                workshop_id,
                service_ids: vec![service],
                payment_method_id: method,
                note: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::External(_)));

    let status: String = sqlx::query_scalar("SELECT payment_status FROM transactions")
        .fetch_one(&app.pool)
        .await?;
    let order_status: String = sqlx::query_scalar("SELECT order_status FROM orders")
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(status, "FAILED");
    assert_eq!(order_status, "CANCELLED");
    Ok(())
}

#[tokio::test]
async fn test_cancel_pending_order_fails_payment_without_refund() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();
    let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Pending, OrderStatus::Pending).await?;

    let receipt = app
        .context
        .order_service
        .cancel_order(&actor, order.id, Some("Changed my mind".to_string()))
        .await?;

    assert_eq!(receipt.order.order_status, OrderStatus::Cancelled);
    assert_eq!(receipt.order.work_status, WorkStatus::Cancelled);
    assert_eq!(receipt.transaction.payment_status, PaymentStatus::Failed);
    assert!(receipt.refund.is_none());
    assert!(app.gateway.refunds.lock().unwrap().is_empty());
    assert_eq!(count(&app.pool, "cancellations").await?, 1);

    // The expiry webhook that follows must not resurrect anything.
    app.context
        .webhook_reconciler
        .handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "EXPIRED"))
        .await?;
    let (stored_tx, _) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_payment_captured_after_cancellation_is_refunded() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();
    let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Pending, OrderStatus::Pending).await?;

    let receipt = app.context.order_service.cancel_order(&actor, order.id, None).await?;
    assert_eq!(receipt.transaction.payment_status, PaymentStatus::Failed);

    // The gateway captured the money while the cancellation was committing.
    let outcome = app
        .context
        .webhook_reconciler
        .handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "PAID"))
        .await?;
    let reconciliation = match outcome {
        WebhookOutcome::Reconciled(reconciliation) => reconciliation,
        WebhookOutcome::TestPing => panic!("expected a reconciliation"),
    };

    assert!(reconciliation.applied);
    assert!(!reconciliation.refund_due);
    assert!(reconciliation.tickets.is_empty());
    assert_eq!(reconciliation.transaction.payment_status, PaymentStatus::Refunded);

    let (stored_tx, stored_order) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Refunded);
    assert_eq!(stored_tx.refund_amount, Some(transaction.total_price));
    assert!(stored_tx.refunded_at.is_some());
    assert_eq!(stored_order.order_status, OrderStatus::Cancelled);
    assert_eq!(stored_order.work_status, WorkStatus::Cancelled);
    assert_eq!(count(&app.pool, "etickets").await?, 0);
    assert_eq!(count(&app.pool, "refunds").await?, 1);

    let refunds = app.gateway.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].idempotency_key, format!("refund-{}", transaction.id));
    assert_eq!(refunds[0].amount, transaction.total_price);

    // Redelivery changes nothing and pays nothing out again.
    app.context
        .webhook_reconciler
        .handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "PAID"))
        .await?;
    assert_eq!(app.gateway.refunds.lock().unwrap().len(), 1);
    let (stored_tx, _) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Refunded);
    Ok(())
}

#[tokio::test]
async fn test_failed_refund_of_late_capture_is_retried_on_redelivery() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();
    let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Pending, OrderStatus::Pending).await?;
    app.context.order_service.cancel_order(&actor, order.id, None).await?;

    app.gateway.fail_refunds.store(true, Ordering::SeqCst);
    let err = app
        .context
        .webhook_reconciler
        .handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "PAID"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));

    // The capture is on record even though the refund did not go out.
    let (stored_tx, stored_order) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Success);
    assert_eq!(stored_order.order_status, OrderStatus::Cancelled);
    assert_eq!(count(&app.pool, "refunds").await?, 0);

    app.gateway.fail_refunds.store(false, Ordering::SeqCst);
    app.context
        .webhook_reconciler
        .handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "PAID"))
        .await?;

    let (stored_tx, _) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Refunded);
    assert_eq!(count(&app.pool, "refunds").await?, 1);
    assert_eq!(app.gateway.refunds.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_payment_captured_after_expiry_is_refunded() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let (transaction, order) = seed_order(&app.pool, Uuid::new_v4(), Uuid::new_v4(), PaymentStatus::Pending, OrderStatus::Pending).await?;
    let reconciler = &app.context.webhook_reconciler;

    reconciler.handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "EXPIRED")).await?;
    reconciler.handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "PAID")).await?;

    let (stored_tx, stored_order) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Refunded);
    assert_eq!(stored_order.order_status, OrderStatus::Cancelled);
    assert_eq!(count(&app.pool, "etickets").await?, 0);
    assert_eq!(app.gateway.refunds.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cancel_paid_order_refunds_once() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();
    let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Success, OrderStatus::Draft).await?;

    let receipt = app.context.order_service.cancel_order(&actor, order.id, None).await?;

    assert_eq!(receipt.transaction.payment_status, PaymentStatus::Refunded);
    assert_eq!(receipt.transaction.refund_amount, Some(transaction.total_price));
    assert!(receipt.transaction.refunded_at.is_some());
    assert_eq!(receipt.order.order_status, OrderStatus::Cancelled);

    let refunds = app.gateway.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].idempotency_key, format!("refund-{}", transaction.id));
    assert_eq!(refunds[0].amount, transaction.total_price);
    assert_eq!(count(&app.pool, "refunds").await?, 1);

    // A second attempt is refused and never reaches the gateway.
    let err = app.context.order_service.cancel_order(&actor, order.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(app.gateway.refunds.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_refund_leaves_order_untouched() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();
    let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Success, OrderStatus::Draft).await?;
    app.gateway.fail_refunds.store(true, Ordering::SeqCst);

    let err = app.context.order_service.cancel_order(&actor, order.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::External(_)));

    let (stored_tx, stored_order) = load(&app.pool, transaction.id, order.id).await?;
    assert_eq!(stored_tx.payment_status, PaymentStatus::Success);
    assert_eq!(stored_order.order_status, OrderStatus::Draft);
    assert_eq!(count(&app.pool, "cancellations").await?, 0);
    assert_eq!(count(&app.pool, "refunds").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_finished_orders_cannot_be_cancelled() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();

    for status in [OrderStatus::Completed, OrderStatus::Cancelled] {
        let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Success, status).await?;

        let err = app.context.order_service.cancel_order(&actor, order.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let (stored_tx, stored_order) = load(&app.pool, transaction.id, order.id).await?;
        assert_eq!(stored_tx.payment_status, PaymentStatus::Success);
        assert_eq!(stored_order.order_status, status);
    }
    assert!(app.gateway.refunds.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_only_owner_may_cancel() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let (_, order) = seed_order(&app.pool, Uuid::new_v4(), Uuid::new_v4(), PaymentStatus::Pending, OrderStatus::Pending).await?;

    let err = app.context.order_service.cancel_order(&customer(), order.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    Ok(())
}

#[tokio::test]
async fn test_work_status_moves_forward_only() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let workshop_id = Uuid::new_v4();
    let admin = workshop_admin(workshop_id);
    let (_, order) = seed_order(&app.pool, Uuid::new_v4(), workshop_id, PaymentStatus::Success, OrderStatus::Draft).await?;
    let mut rx = app.channel.subscribe();

    let updated = app.context.order_service.update_work_status(&admin, order.id, WorkStatus::Putty).await?;
    assert_eq!(updated.work_status, WorkStatus::Putty);
    assert_eq!(updated.order_status, OrderStatus::Processing);

    let mut targets = Vec::new();
    while let Ok(message) = rx.try_recv() {
        targets.push(message.target);
    }
    assert!(targets.contains(&format!("user:{}", order.user_id)));
    assert!(targets.contains(&format!("workshop:{}", workshop_id)));

    let err = app
        .context
        .order_service
        .update_work_status(&admin, order.id, WorkStatus::Inspection)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let done = app.context.order_service.update_work_status(&admin, order.id, WorkStatus::Done).await?;
    assert_eq!(done.order_status, OrderStatus::Completed);
    assert_eq!(done.work_status, WorkStatus::Done);
    Ok(())
}

#[tokio::test]
async fn test_work_status_requires_workshop_admin_and_paid_order() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let workshop_id = Uuid::new_v4();
    let (_, paid) = seed_order(&app.pool, Uuid::new_v4(), workshop_id, PaymentStatus::Success, OrderStatus::Draft).await?;
    let (_, unpaid) = seed_order(&app.pool, Uuid::new_v4(), workshop_id, PaymentStatus::Pending, OrderStatus::Pending).await?;

    let err = app
        .context
        .order_service
        .update_work_status(&workshop_admin(Uuid::new_v4()), paid.id, WorkStatus::Putty)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = app
        .context
        .order_service
        .update_work_status(&workshop_admin(workshop_id), unpaid.id, WorkStatus::Putty)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    Ok(())
}

#[tokio::test]
async fn test_get_order_includes_ticket_after_payment() -> anyhow::Result<()> {
    let app = spawn_context().await?;
    let actor = customer();
    let (transaction, order) = seed_order(&app.pool, actor.user_id, Uuid::new_v4(), PaymentStatus::Pending, OrderStatus::Pending).await?;

    let details = app.context.order_service.get_order(&actor, order.id).await?;
    assert!(details.ticket.is_none());

    app.context
        .webhook_reconciler
        .handle(Some(CALLBACK_TOKEN), invoice_callback(transaction.id, "SETTLED"))
        .await?;

    let details = app.context.order_service.get_order(&actor, order.id).await?;
    assert_eq!(details.transaction.payment_status, PaymentStatus::Success);
    assert_eq!(details.ticket.map(|t| t.ticket_number), Some(1));

    let err = app.context.order_service.get_order(&customer(), order.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    Ok(())
}
