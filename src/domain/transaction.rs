use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One payment attempt. Money fields are integer minor units of the
/// configured currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_method_id: Uuid,
    pub admin_fee: i64,
    pub payment_method_fee: i64,
    pub total_price: i64,
    pub payment_status: PaymentStatus,
    pub invoice_id: Option<String>,
    pub payment_invoice_url: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Expired,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(PaymentStatus::Pending),
            "SUCCESS" => Some(PaymentStatus::Success),
            "FAILED" => Some(PaymentStatus::Failed),
            "EXPIRED" => Some(PaymentStatus::Expired),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Whether a stored status may be overwritten by `next`.
    ///
    /// A pending payment can settle into anything; a successful one can only
    /// be refunded. A closed payment (failed, expired or cancelled) still
    /// accepts a capture the gateway reports late. Refunded is final.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match self {
            PaymentStatus::Pending => next != PaymentStatus::Pending,
            PaymentStatus::Success => next == PaymentStatus::Refunded,
            status if status.is_closed() => next == PaymentStatus::Success,
            _ => false,
        }
    }

    /// Closed without money having moved.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Cancelled
        )
    }
}

/// User-initiated cancellation of an order. Its presence steers the
/// EXPIRED branch of the gateway state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Money returned through the gateway. `idempotency_key` is unique per
/// transaction so a replayed cancellation never refunds twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub gateway_refund_id: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Refund {
    pub fn key_for(transaction_id: Uuid) -> String {
        format!("refund-{}", transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_can_settle_anywhere() {
        for next in [
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            assert!(PaymentStatus::Pending.can_transition_to(next));
        }
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn test_success_only_refunds() {
        assert!(PaymentStatus::Success.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Success.can_transition_to(PaymentStatus::Expired));
        assert!(!PaymentStatus::Success.can_transition_to(PaymentStatus::Success));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Success));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn test_closed_payment_only_accepts_capture() {
        for closed in [PaymentStatus::Failed, PaymentStatus::Expired, PaymentStatus::Cancelled] {
            assert!(closed.is_closed());
            assert!(closed.can_transition_to(PaymentStatus::Success), "{:?}", closed);
            assert!(!closed.can_transition_to(PaymentStatus::Expired), "{:?}", closed);
            assert!(!closed.can_transition_to(PaymentStatus::Failed), "{:?}", closed);
            assert!(!closed.can_transition_to(PaymentStatus::Refunded), "{:?}", closed);
        }
        assert!(!PaymentStatus::Refunded.is_closed());
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Success));
    }

    #[test]
    fn test_payment_status_strings() {
        assert_eq!(PaymentStatus::Refunded.as_str(), "REFUNDED");
        assert_eq!(PaymentStatus::parse("success"), Some(PaymentStatus::Success));
        assert_eq!(PaymentStatus::parse("settled"), None);
    }
}
