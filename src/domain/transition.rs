//! Gateway status → payment/order state transitions.
//!
//! Both webhook shapes (invoice and payment request) feed the same table; the
//! only per-flow differences are the status vocabulary and the order status a
//! paid order lands in.

use serde::{Deserialize, Serialize};

use super::{OrderStatus, PaymentStatus, WorkStatus};

/// Which webhook shape delivered the status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFlow {
    Invoice,
    PaymentRequest,
}

impl WebhookFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookFlow::Invoice => "invoice",
            WebhookFlow::PaymentRequest => "payment_request",
        }
    }

    /// Order status assigned when this flow reports a completed payment.
    pub fn paid_order_status(&self) -> OrderStatus {
        match self {
            WebhookFlow::Invoice => OrderStatus::Draft,
            WebhookFlow::PaymentRequest => OrderStatus::Accepted,
        }
    }
}

/// Normalized gateway outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Paid,
    Expired,
    Stopped,
    /// Anything the gateway may send that this service does not act on.
    Unknown(String),
}

impl GatewayStatus {
    pub fn parse(flow: WebhookFlow, raw: &str) -> Self {
        let normalized = raw.trim().to_uppercase();
        let known = match (flow, normalized.as_str()) {
            (WebhookFlow::Invoice, "PAID") | (WebhookFlow::Invoice, "SETTLED") => Some(GatewayStatus::Paid),
            (WebhookFlow::PaymentRequest, "SUCCEEDED") => Some(GatewayStatus::Paid),
            (_, "EXPIRED") => Some(GatewayStatus::Expired),
            (_, "STOPPED") => Some(GatewayStatus::Stopped),
            _ => None,
        };
        known.unwrap_or(GatewayStatus::Unknown(normalized))
    }
}

/// What the state machine needs to know about the stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSnapshot {
    pub payment_status: PaymentStatus,
    pub has_cancellation: bool,
    pub has_refund: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAction {
    None,
    IssueTicket,
}

/// New state for a transaction and all of its orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetState {
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    /// `None` leaves each order's work status untouched.
    pub work_status: Option<WorkStatus>,
    pub ticket_action: TicketAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply(TargetState),
    /// Unknown status, replay of an already applied status, or a move the
    /// payment status does not allow. Nothing is written.
    NoOp,
}

/// Compute the transition for one gateway callback.
pub fn transition(flow: WebhookFlow, current: TransactionSnapshot, incoming: &GatewayStatus) -> Transition {
    let target = match incoming {
        // Captured after the orders were already cancelled: record the money,
        // keep the orders cancelled and issue no ticket.
        GatewayStatus::Paid if current.payment_status.is_closed() => TargetState {
            payment_status: PaymentStatus::Success,
            order_status: OrderStatus::Cancelled,
            work_status: Some(WorkStatus::Cancelled),
            ticket_action: TicketAction::None,
        },
        GatewayStatus::Paid => TargetState {
            payment_status: PaymentStatus::Success,
            order_status: flow.paid_order_status(),
            work_status: None,
            ticket_action: TicketAction::IssueTicket,
        },
        GatewayStatus::Expired => {
            let payment_status = match (current.has_cancellation, current.has_refund) {
                (true, true) => PaymentStatus::Refunded,
                (true, false) => PaymentStatus::Failed,
                (false, _) => PaymentStatus::Expired,
            };
            cancelled(payment_status)
        }
        GatewayStatus::Stopped => cancelled(PaymentStatus::Failed),
        GatewayStatus::Unknown(_) => return Transition::NoOp,
    };

    if !current.payment_status.can_transition_to(target.payment_status) {
        return Transition::NoOp;
    }

    Transition::Apply(target)
}

fn cancelled(payment_status: PaymentStatus) -> TargetState {
    TargetState {
        payment_status,
        order_status: OrderStatus::Cancelled,
        work_status: Some(WorkStatus::Cancelled),
        ticket_action: TicketAction::None,
    }
}
