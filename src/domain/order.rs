use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_car_id: Uuid,
    pub workshop_id: Uuid,
    pub transaction_id: Uuid,
    pub order_status: OrderStatus,
    pub work_status: WorkStatus,
    pub note: Option<String>,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Owners may cancel until the order is finished one way or the other.
    pub fn is_cancellable(&self) -> bool {
        !matches!(self.order_status, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Pending,
    Accepted,
    Confirmed,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(OrderStatus::Draft),
            "PENDING" => Some(OrderStatus::Pending),
            "ACCEPTED" => Some(OrderStatus::Accepted),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "PROCESSING" => Some(OrderStatus::Processing),
            "COMPLETED" => Some(OrderStatus::Completed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Statuses in which the workshop may advance the repair work.
    pub fn allows_work_progress(&self) -> bool {
        matches!(
            self,
            OrderStatus::Draft
                | OrderStatus::Accepted
                | OrderStatus::Confirmed
                | OrderStatus::Processing
        )
    }
}

/// Repair pipeline of a body/paint job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    Queued,
    Inspection,
    Putty,
    Surfacer,
    ApplicationColorBase,
    ApplicationClearCoat,
    Polishing,
    FinalQc,
    Done,
    Cancelled,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Queued => "QUEUED",
            WorkStatus::Inspection => "INSPECTION",
            WorkStatus::Putty => "PUTTY",
            WorkStatus::Surfacer => "SURFACER",
            WorkStatus::ApplicationColorBase => "APPLICATION_COLOR_BASE",
            WorkStatus::ApplicationClearCoat => "APPLICATION_CLEAR_COAT",
            WorkStatus::Polishing => "POLISHING",
            WorkStatus::FinalQc => "FINAL_QC",
            WorkStatus::Done => "DONE",
            WorkStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Some(WorkStatus::Queued),
            "INSPECTION" => Some(WorkStatus::Inspection),
            "PUTTY" => Some(WorkStatus::Putty),
            "SURFACER" => Some(WorkStatus::Surfacer),
            "APPLICATION_COLOR_BASE" => Some(WorkStatus::ApplicationColorBase),
            "APPLICATION_CLEAR_COAT" => Some(WorkStatus::ApplicationClearCoat),
            "POLISHING" => Some(WorkStatus::Polishing),
            "FINAL_QC" => Some(WorkStatus::FinalQc),
            // Older rows used COMPLETED for the last step.
            "DONE" | "COMPLETED" => Some(WorkStatus::Done),
            "CANCELLED" => Some(WorkStatus::Cancelled),
            _ => None,
        }
    }

    /// Position in the repair pipeline; `None` for `Cancelled`.
    pub fn step(&self) -> Option<u8> {
        match self {
            WorkStatus::Queued => Some(0),
            WorkStatus::Inspection => Some(1),
            WorkStatus::Putty => Some(2),
            WorkStatus::Surfacer => Some(3),
            WorkStatus::ApplicationColorBase => Some(4),
            WorkStatus::ApplicationClearCoat => Some(5),
            WorkStatus::Polishing => Some(6),
            WorkStatus::FinalQc => Some(7),
            WorkStatus::Done => Some(8),
            WorkStatus::Cancelled => None,
        }
    }

    /// True when moving from `self` to `next` goes forward in the pipeline.
    pub fn can_advance_to(&self, next: WorkStatus) -> bool {
        match (self.step(), next.step()) {
            (Some(current), Some(target)) => target > current,
            _ => false,
        }
    }
}

/// A priced line of an order, copied from the workshop's service list at
/// checkout time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderServiceLine {
    pub order_id: Uuid,
    pub service_id: Uuid,
    pub name: String,
    pub price: i64,
}
