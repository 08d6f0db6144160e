use chrono::Utc;
use serde_json::json;

use crate::{
    domain::{Order, OrderStatus, PaymentStatus, Transaction, WorkStatus},
    notifications::{NotificationKind, NotifyError, PushHandle, PushMessage, PushTarget, SUPER_ADMIN_ROLE},
};

pub fn order_status_message(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Draft => "Payment received, your order is waiting for the workshop",
        OrderStatus::Accepted => "Your order has been accepted by the workshop",
        OrderStatus::Confirmed => "Your order has been confirmed",
        OrderStatus::Processing => "Your car is being worked on",
        OrderStatus::Completed => "Your order is complete",
        OrderStatus::Cancelled => "Your order has been cancelled",
        _ => "Your order status has been updated",
    }
}

pub fn payment_status_message(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Success => "Payment successful",
        PaymentStatus::Failed => "Payment failed",
        PaymentStatus::Expired => "Payment expired",
        PaymentStatus::Refunded => "Payment refunded",
        _ => "Payment status has been updated",
    }
}

pub fn work_status_message(status: WorkStatus) -> &'static str {
    match status {
        WorkStatus::Inspection => "Your car is being inspected",
        WorkStatus::Putty => "Putty is being applied",
        WorkStatus::Surfacer => "Surfacer is being applied",
        WorkStatus::ApplicationColorBase => "Base color is being applied",
        WorkStatus::ApplicationClearCoat => "Clear coat is being applied",
        WorkStatus::Polishing => "Your car is being polished",
        WorkStatus::FinalQc => "Final quality check in progress",
        WorkStatus::Done => "Work finished, your car is ready for pickup",
        _ => "Work progress has been updated",
    }
}

/// Formats domain changes into push messages and fans them out to the
/// affected audiences. Every failure is logged and dropped.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    handle: PushHandle,
}

impl NotificationDispatcher {
    pub fn new(handle: PushHandle) -> Self {
        Self { handle }
    }

    /// Owner, plus the workshop's admins once the order has left DRAFT.
    pub async fn order_status_changed(&self, order: &Order) {
        let message = order_status_message(order.order_status);
        let data = json!({
            "order_id": order.id,
            "transaction_id": order.transaction_id,
            "order_status": order.order_status,
            "work_status": order.work_status,
        });

        self.publish(PushTarget::User(order.user_id), NotificationKind::OrderStatus, message, &data)
            .await;
        if order.order_status != OrderStatus::Draft {
            self.publish(PushTarget::Workshop(order.workshop_id), NotificationKind::OrderStatus, message, &data)
                .await;
        }
    }

    /// Owner, plus super admins once the payment is no longer pending.
    pub async fn payment_status_changed(&self, transaction: &Transaction) {
        let message = payment_status_message(transaction.payment_status);
        let data = json!({
            "transaction_id": transaction.id,
            "payment_status": transaction.payment_status,
            "total_price": transaction.total_price,
        });

        self.publish(PushTarget::User(transaction.user_id), NotificationKind::PaymentStatus, message, &data)
            .await;
        if transaction.payment_status != PaymentStatus::Pending {
            self.publish(
                PushTarget::Role(SUPER_ADMIN_ROLE.to_string()),
                NotificationKind::PaymentStatus,
                message,
                &data,
            )
            .await;
        }
    }

    pub async fn work_status_changed(&self, order: &Order) {
        let message = work_status_message(order.work_status);
        let data = json!({
            "order_id": order.id,
            "order_status": order.order_status,
            "work_status": order.work_status,
        });

        self.publish(PushTarget::User(order.user_id), NotificationKind::WorkStatus, message, &data)
            .await;
        self.publish(PushTarget::Workshop(order.workshop_id), NotificationKind::WorkStatus, message, &data)
            .await;
    }

    async fn publish(&self, target: PushTarget, kind: NotificationKind, message: &str, data: &serde_json::Value) {
        let push = PushMessage {
            target: target.to_string(),
            kind,
            message: message.to_string(),
            data: data.clone(),
            sent_at: Utc::now(),
        };

        match self.handle.publish(push).await {
            Ok(()) => tracing::debug!("Pushed {:?} notification to {}", kind, target),
            Err(NotifyError::NotInitialized) => {
                tracing::warn!("Push channel not initialized, dropping {:?} notification for {}", kind, target)
            }
            Err(NotifyError::NoSubscribers(_)) => {
                tracing::debug!("Nobody listening on {}, dropping {:?} notification", target, kind)
            }
            Err(e) => tracing::warn!("Failed to push {:?} notification to {}: {}", kind, target, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::PushChannel;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushChannel for RecordingChannel {
        async fn publish(&self, message: PushMessage) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct FailingChannel;

    #[async_trait]
    impl PushChannel for FailingChannel {
        async fn publish(&self, _message: PushMessage) -> Result<(), NotifyError> {
            Err(NotifyError::Push("socket closed".to_string()))
        }
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            user_car_id: Uuid::new_v4(),
            workshop_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            order_status: status,
            work_status: WorkStatus::Inspection,
            note: None,
            total_price: 150_000,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn transaction(status: PaymentStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            admin_fee: 5_000,
            payment_method_fee: 4_500,
            total_price: 159_500,
            payment_status: status,
            invoice_id: None,
            payment_invoice_url: None,
            refund_amount: None,
            refunded_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn recording() -> (Arc<RecordingChannel>, NotificationDispatcher) {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::new(PushHandle::ready(channel.clone()));
        (channel, dispatcher)
    }

    fn targets(channel: &RecordingChannel) -> Vec<String> {
        channel.sent.lock().unwrap().iter().map(|m| m.target.clone()).collect()
    }

    #[tokio::test]
    async fn test_draft_order_skips_workshop() {
        let (channel, dispatcher) = recording();
        let draft = order(OrderStatus::Draft);
        dispatcher.order_status_changed(&draft).await;
        assert_eq!(targets(&channel), vec![format!("user:{}", draft.user_id)]);
    }

    #[tokio::test]
    async fn test_accepted_order_reaches_workshop() {
        let (channel, dispatcher) = recording();
        let accepted = order(OrderStatus::Accepted);
        dispatcher.order_status_changed(&accepted).await;
        assert_eq!(
            targets(&channel),
            vec![
                format!("user:{}", accepted.user_id),
                format!("workshop:{}", accepted.workshop_id),
            ]
        );
    }

    #[tokio::test]
    async fn test_settled_payment_reaches_super_admin() {
        let (channel, dispatcher) = recording();
        dispatcher.payment_status_changed(&transaction(PaymentStatus::Pending)).await;
        assert_eq!(channel.sent.lock().unwrap().len(), 1);

        let paid = transaction(PaymentStatus::Success);
        dispatcher.payment_status_changed(&paid).await;
        let sent = targets(&channel);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2], "role:SUPERADMIN");
        assert_eq!(channel.sent.lock().unwrap()[2].message, "Payment successful");
    }

    #[tokio::test]
    async fn test_uninitialized_and_failing_channels_are_swallowed() {
        NotificationDispatcher::default()
            .order_status_changed(&order(OrderStatus::Cancelled))
            .await;
        NotificationDispatcher::new(PushHandle::ready(Arc::new(FailingChannel)))
            .payment_status_changed(&transaction(PaymentStatus::Failed))
            .await;
    }

    #[test]
    fn test_fallback_messages() {
        assert_eq!(order_status_message(OrderStatus::Pending), "Your order status has been updated");
        assert_eq!(payment_status_message(PaymentStatus::Cancelled), "Payment status has been updated");
        assert_eq!(work_status_message(WorkStatus::Queued), "Work progress has been updated");
    }
}
