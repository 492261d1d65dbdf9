use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use ember_types::events::GatewayEvent;

/// Tracks connected clients. Almost everything in Ember is a targeted
/// one-to-one delivery (messages, typing, match notifications); the broadcast
/// channel only carries presence.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Presence fan-out; every connected client receives these.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Currently-online users.
    online_users: RwLock<HashSet<Uuid>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashSet::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to presence broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A reconnect replaces the previous channel; the conn_id lets the old
    /// connection's teardown recognize it no longer owns the registration.
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Deliver-if-present: send a targeted event to a user's live connection.
    /// No-op when they are offline: the REST API is the source of truth and
    /// clients re-sync on reconnect.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn user_online(&self, user_id: Uuid) {
        self.inner.online_users.write().await.insert(user_id);
        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
        });
    }

    /// Tear down a connection's registration, but only if it still owns it.
    /// A newer connection for the same user must not be disturbed.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        match channels.get(&user_id) {
            Some((owner, _)) if *owner == conn_id => {
                channels.remove(&user_id);
            }
            _ => return,
        }
        drop(channels);

        self.inner.online_users.write().await.remove(&user_id);
        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: false,
        });
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.iter().copied().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn targeted_send_reaches_only_the_registered_user() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (_conn, mut alice_rx) = dispatcher.register_user_channel(alice).await;

        dispatcher
            .send_to_user(alice, GatewayEvent::TypingStart { user_id: bob })
            .await;
        dispatcher
            .send_to_user(bob, GatewayEvent::TypingStart { user_id: alice })
            .await;

        let got = alice_rx.recv().await.unwrap();
        assert!(matches!(got, GatewayEvent::TypingStart { user_id } if user_id == bob));
        assert!(alice_rx.try_recv().is_err(), "nothing else queued");
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_newer_connection() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(alice).await;
        dispatcher.user_online(alice).await;

        // Reconnect takes over the registration.
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(alice).await;

        // The old connection's teardown must leave the new channel in place.
        dispatcher.user_offline(alice, old_conn).await;
        dispatcher
            .send_to_user(alice, GatewayEvent::Ready { user_id: alice })
            .await;
        assert!(new_rx.recv().await.is_some());
        assert_eq!(dispatcher.online_users().await, vec![alice]);
    }
}
