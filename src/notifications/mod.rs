//! Realtime push of order, payment and work-status changes.
//!
//! The push channel is injected as a [`PushHandle`]; an uninitialized handle
//! turns every publish into a logged no-op. Nothing in here returns an error
//! to callers: notifications go out after the state they describe has been
//! committed and must never affect it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Actor, Role};

pub mod broadcast;
pub mod dispatcher;

pub use broadcast::BroadcastPushChannel;
pub use dispatcher::NotificationDispatcher;

/// Role that receives every settled transaction.
pub const SUPER_ADMIN_ROLE: &str = "SUPERADMIN";

/// Addressable audience of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PushTarget {
    User(Uuid),
    Role(String),
    Workshop(Uuid),
    Broadcast,
}

impl PushTarget {
    /// Every target a connected actor should receive messages for.
    pub fn audience(actor: &Actor) -> Vec<PushTarget> {
        let mut targets = vec![
            PushTarget::User(actor.user_id),
            PushTarget::Role(actor.role.as_str().to_string()),
            PushTarget::Broadcast,
        ];
        if actor.role == Role::WorkshopAdmin {
            if let Some(workshop_id) = actor.workshop_id {
                targets.push(PushTarget::Workshop(workshop_id));
            }
        }
        targets
    }
}

impl fmt::Display for PushTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushTarget::User(id) => write!(f, "user:{}", id),
            PushTarget::Role(role) => write!(f, "role:{}", role),
            PushTarget::Workshop(id) => write!(f, "workshop:{}", id),
            PushTarget::Broadcast => write!(f, "broadcast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderStatus,
    PaymentStatus,
    WorkStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    /// Rendered target, e.g. `user:<uuid>`.
    pub target: String,
    pub kind: NotificationKind,
    pub message: String,
    pub data: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("push channel not initialized")]
    NotInitialized,

    #[error("no subscribers listening on {0}")]
    NoSubscribers(String),

    #[error("push failed: {0}")]
    Push(String),
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn publish(&self, message: PushMessage) -> Result<(), NotifyError>;
}

/// Injected capability to reach the realtime channel.
#[derive(Clone, Default)]
pub enum PushHandle {
    #[default]
    Uninitialized,
    Ready(Arc<dyn PushChannel>),
}

impl PushHandle {
    pub fn ready(channel: Arc<dyn PushChannel>) -> Self {
        PushHandle::Ready(channel)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PushHandle::Ready(_))
    }

    pub async fn publish(&self, message: PushMessage) -> Result<(), NotifyError> {
        match self {
            PushHandle::Uninitialized => Err(NotifyError::NotInitialized),
            PushHandle::Ready(channel) => channel.publish(message).await,
        }
    }
}
