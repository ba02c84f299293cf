//! Outbound delivery of notifications to session egress channels.
//!
//! The propagation protocol only needs "deliver this document to that
//! session". `ChannelNotifier` does it in-process with one unbounded tokio
//! channel per attached session; a transport-backed notifier plugs in
//! behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{Notification, ObjectId};
use crate::{Error, Result};

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver one notification to one session.
    async fn deliver(&self, session: &ObjectId, notification: &Notification) -> Result<()>;
}

/// In-process egress: each attached session gets a receiver.
#[derive(Default)]
pub struct ChannelNotifier {
    egress: RwLock<HashMap<ObjectId, mpsc::UnboundedSender<Notification>>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) the egress channel of `session`.
    pub fn attach(&self, session: &ObjectId) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.egress.write().insert(session.clone(), tx);
        rx
    }

    pub fn detach(&self, session: &ObjectId) -> bool {
        self.egress.write().remove(session).is_some()
    }

    /// Drop a dead sender, unless a concurrent `attach` already replaced it.
    fn evict(&self, session: &ObjectId, dead: &mpsc::UnboundedSender<Notification>) -> bool {
        let mut egress = self.egress.write();
        if egress.get(session).is_some_and(|current| current.same_channel(dead)) {
            egress.remove(session);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn deliver(&self, session: &ObjectId, notification: &Notification) -> Result<()> {
        let sender = self
            .egress
            .read()
            .get(session)
            .cloned()
            .ok_or_else(|| Error::Delivery(format!("no egress channel for session {session}")))?;
        sender.send(notification.clone()).map_err(|_| {
            self.evict(session, &sender);
            Error::Delivery(format!("egress channel of session {session} is closed"))
        })?;
        debug!(%session, "notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_deliver_to_attached_session() {
        let notifier = ChannelNotifier::new();
        let session = ObjectId::new("s1");
        let mut rx = notifier.attach(&session);

        let n = Notification::single("rack", &ObjectId::new("rack1"), json!({"name": "rack1"}));
        notifier.deliver(&session, &n).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.to_json(), json!({"controllers": {"rack": {"rack1": {"name": "rack1"}}}}));
    }

    #[tokio::test]
    async fn test_unknown_or_closed_session_is_a_delivery_error() {
        let notifier = ChannelNotifier::new();
        let n = Notification::default();
        assert!(matches!(notifier.deliver(&ObjectId::new("nobody"), &n).await, Err(Error::Delivery(_))));

        let session = ObjectId::new("s1");
        drop(notifier.attach(&session));
        assert!(matches!(notifier.deliver(&session, &n).await, Err(Error::Delivery(_))));
        assert!(!notifier.detach(&session));
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_evict_a_newer_attach() {
        let notifier = ChannelNotifier::new();
        let session = ObjectId::new("s1");
        let stale = notifier.attach(&session);
        let sender = notifier.egress.read().get(&session).cloned().unwrap();
        drop(stale);

        // Reattach between the lookup and the failed send.
        let mut fresh = notifier.attach(&session);
        let n = Notification::single("rack", &ObjectId::new("rack1"), json!({}));
        assert!(sender.send(n.clone()).is_err());
        assert!(!notifier.evict(&session, &sender));

        notifier.deliver(&session, &n).await.unwrap();
        assert_eq!(fresh.recv().await.unwrap(), n);
    }
}
