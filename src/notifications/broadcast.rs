use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::notifications::{NotifyError, PushChannel, PushMessage};

/// In-process fan-out over a `tokio` broadcast channel. Each connected
/// client holds a receiver and filters on [`PushMessage::target`].
#[derive(Debug, Clone)]
pub struct BroadcastPushChannel {
    tx: broadcast::Sender<PushMessage>,
}

impl BroadcastPushChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }

    /// Clients currently holding a receiver.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl PushChannel for BroadcastPushChannel {
    async fn publish(&self, message: PushMessage) -> Result<(), NotifyError> {
        let target = message.target.clone();
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| NotifyError::NoSubscribers(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationKind;

    fn message(target: &str) -> PushMessage {
        PushMessage {
            target: target.to_string(),
            kind: NotificationKind::OrderStatus,
            message: "hello".to_string(),
            data: serde_json::Value::Null,
            sent_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let channel = BroadcastPushChannel::new(8);
        let mut rx = channel.subscribe();
        channel.publish(message("user:1")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().target, "user:1");
    }

    #[test]
    fn test_subscriber_count_tracks_receivers() {
        let channel = BroadcastPushChannel::new(8);
        assert_eq!(channel.subscriber_count(), 0);
        let first = channel.subscribe();
        let _second = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 2);
        drop(first);
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_errors() {
        let channel = BroadcastPushChannel::new(8);
        let err = channel.publish(message("role:SUPERADMIN")).await.unwrap_err();
        assert!(matches!(err, NotifyError::NoSubscribers(_)));
    }
}
