use std::sync::Arc;

use murmur_shared::{MessageEvent, UserId};
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;

/// Outcome of one delivery. Never surfaced to the sender; used for logs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connected channels the event was addressed to.
    pub targeted: usize,
    pub delivered: Vec<UserId>,
    pub failed: Vec<UserId>,
}

/// Decides who receives a persisted message and pushes it to their channels.
#[derive(Clone)]
pub struct FanOut {
    registry: ConnectionRegistry,
}

impl FanOut {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Public events go to every connected user; private events to the
    /// sender and the recipient only. Best effort: a failed push is logged
    /// and skipped, nothing is queued or retried.
    pub async fn deliver(&self, event: &MessageEvent) -> DeliveryReport {
        let payload: Arc<str> = match event.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(error = %e, "Failed to serialize message event");
                return DeliveryReport::default();
            }
        };

        let targets = match &event.recipient_user_id {
            None => self.registry.snapshot().await,
            Some(recipient) if *recipient == event.user_id => {
                self.registry.select(std::slice::from_ref(recipient)).await
            }
            Some(recipient) => {
                self.registry
                    .select(&[event.user_id.clone(), recipient.clone()])
                    .await
            }
        };

        let mut report = DeliveryReport {
            targeted: targets.len(),
            ..Default::default()
        };

        for (user, conn) in targets {
            match conn.send(payload.clone()) {
                Ok(()) => report.delivered.push(user),
                Err(e) => {
                    warn!(user = %user.short(), error = %e, "Dropping event for channel");
                    report.failed.push(user);
                }
            }
        }

        debug!(
            public = event.is_public(),
            targeted = report.targeted,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Fan-out complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn event(from: &str, to: Option<&str>, content: &str) -> MessageEvent {
        MessageEvent {
            user_id: UserId::new(from),
            recipient_user_id: to.map(UserId::new),
            content: content.to_string(),
            created_at: Utc::now(),
            attachment: None,
        }
    }

    async fn connect(
        registry: &ConnectionRegistry,
        id: &str,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<str>> {
        let (conn, rx) = ConnectionHandle::new(capacity);
        registry.add(UserId::new(id), conn).await;
        rx
    }

    #[tokio::test]
    async fn test_public_reaches_everyone_connected() {
        let registry = ConnectionRegistry::new();
        let mut a = connect(&registry, "u1", 4).await;
        let mut b = connect(&registry, "u2", 4).await;
        let mut c = connect(&registry, "u3", 4).await;

        let report = FanOut::new(registry).deliver(&event("u1", None, "hello")).await;

        assert_eq!(report.targeted, 3);
        assert_eq!(report.delivered.len(), 3);
        for rx in [&mut a, &mut b, &mut c] {
            let payload = rx.try_recv().unwrap();
            assert!(payload.contains("\"hello\""));
        }
    }

    #[tokio::test]
    async fn test_private_reaches_only_the_pair() {
        let registry = ConnectionRegistry::new();
        let mut a = connect(&registry, "u1", 4).await;
        let mut b = connect(&registry, "u2", 4).await;
        let mut c = connect(&registry, "u3", 4).await;

        let report = FanOut::new(registry)
            .deliver(&event("u1", Some("u2"), "hi"))
            .await;

        assert_eq!(report.delivered, vec![UserId::new("u1"), UserId::new("u2")]);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_recipient_is_not_targeted() {
        let registry = ConnectionRegistry::new();
        let mut a = connect(&registry, "u1", 4).await;

        let report = FanOut::new(registry)
            .deliver(&event("u1", Some("u2"), "anyone?"))
            .await;

        assert_eq!(report.targeted, 1);
        assert!(a.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_channel_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        let _slow = connect(&registry, "slow", 1).await;
        let mut fast = connect(&registry, "fast", 4).await;
        let fanout = FanOut::new(registry);

        fanout.deliver(&event("fast", None, "one")).await;
        let report = fanout.deliver(&event("fast", None, "two")).await;

        assert_eq!(report.failed, vec![UserId::new("slow")]);
        assert_eq!(report.delivered, vec![UserId::new("fast")]);
        assert!(fast.try_recv().is_ok());
        assert!(fast.try_recv().is_ok());
    }
}
