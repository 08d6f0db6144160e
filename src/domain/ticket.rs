use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proof of payment and queue position. Never updated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ETicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub ticket_number: i64,
    pub created_at: DateTime<Utc>,
}
