//! Message broadcast hub.
//!
//! The hub owns the registry of admitted connections. Each connection is
//! keyed by a monotonic id and tagged with the identity resolved at
//! admission time; delivery is a one-way channel send with no
//! acknowledgment, matching the fire-and-forget client contract.

use chrono::DateTime;
use murmur_database::MessageRepository;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error};

/// Submissions longer than this are dropped outright.
pub const MAX_BODY_LENGTH: usize = 2000;

/// Events received from WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Submit a message with a client-side timestamp.
    Submit { message: String, date: String },
    /// Ask for the full history again.
    RequestHistory,
}

/// Events pushed to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The complete ordered message history.
    History { messages: Vec<HistoryEntry> },
}

/// One history entry on the wire. Field names are the wire format the
/// original client speaks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub user: String,
    pub message: String,
    pub date: String,
}

struct Peer {
    identity: String,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

/// Registry of admitted connections plus the append/broadcast engine.
pub struct ChatHub {
    peers: RwLock<HashMap<u64, Peer>>,
    next_id: AtomicU64,
    messages: MessageRepository,
    /// Serializes append + fan-out (and catch-up reads) so every
    /// observer sees one total order and no broadcast ever precedes its
    /// append.
    submit_lock: Mutex<()>,
}

impl ChatHub {
    pub fn new(messages: MessageRepository) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            messages,
            submit_lock: Mutex::new(()),
        }
    }

    /// Register an admitted connection and push the current history to it
    /// (catch-up). Returns the connection id used for all later calls.
    pub async fn connect(
        &self,
        identity: String,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> u64 {
        let _guard = self.submit_lock.lock().await;

        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut peers = self.peers.write().await;
            peers.insert(
                connection_id,
                Peer {
                    identity: identity.clone(),
                    sender,
                },
            );
        }
        debug!(connection_id, %identity, "connection admitted");

        self.send_history_to(connection_id).await;
        connection_id
    }

    /// Remove a connection from the registry. Idempotent; a second call
    /// for the same id is a no-op.
    pub async fn disconnect(&self, connection_id: u64) {
        let removed = self.peers.write().await.remove(&connection_id);
        if removed.is_some() {
            debug!(connection_id, "connection closed");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Handle a message submission from an admitted connection.
    ///
    /// Malformed submissions are dropped without a reply: the channel is
    /// fire-and-forget, so the sender gets no error either way. The
    /// author is always the identity the connection was admitted with,
    /// never anything client-supplied.
    pub async fn submit(&self, connection_id: u64, message: &str, date: &str) {
        let _guard = self.submit_lock.lock().await;

        let identity = {
            let peers = self.peers.read().await;
            match peers.get(&connection_id) {
                Some(peer) => peer.identity.clone(),
                None => {
                    debug!(connection_id, "dropping submission from unknown connection");
                    return;
                }
            }
        };

        let body = message.trim();
        if body.is_empty() || body.len() > MAX_BODY_LENGTH {
            debug!(connection_id, "dropping submission with invalid body");
            return;
        }

        if DateTime::parse_from_rfc3339(date).is_err() {
            debug!(connection_id, date, "dropping submission with unparseable timestamp");
            return;
        }

        if let Err(err) = self.messages.append(&identity, body, date).await {
            error!(error = %err, connection_id, "failed to persist message; nothing broadcast");
            return;
        }

        self.broadcast_history().await;
    }

    /// Push the full history to one connection on request.
    pub async fn request_history(&self, connection_id: u64) {
        let _guard = self.submit_lock.lock().await;
        self.send_history_to(connection_id).await;
    }

    async fn load_history(&self) -> Option<Vec<HistoryEntry>> {
        match self.messages.list_ordered().await {
            Ok(messages) => Some(
                messages
                    .into_iter()
                    .map(|m| HistoryEntry {
                        user: m.username,
                        message: m.body,
                        date: m.sent_at,
                    })
                    .collect(),
            ),
            Err(err) => {
                error!(error = %err, "failed to load message history");
                None
            }
        }
    }

    /// Fan the full history out to every admitted connection. A failed
    /// send means the peer is on its way out; its receive loop will
    /// deregister it.
    async fn broadcast_history(&self) {
        let Some(messages) = self.load_history().await else {
            return;
        };

        let peers = self.peers.read().await;
        for peer in peers.values() {
            let _ = peer.sender.send(ServerEvent::History {
                messages: messages.clone(),
            });
        }
    }

    async fn send_history_to(&self, connection_id: u64) {
        let Some(messages) = self.load_history().await else {
            return;
        };

        let peers = self.peers.read().await;
        if let Some(peer) = peers.get(&connection_id) {
            let _ = peer.sender.send(ServerEvent::History { messages });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_database::{run_migrations, UserRepository};
    use sqlx::SqlitePool;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn test_hub() -> ChatHub {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let users = UserRepository::new(pool.clone());
        users.create("alice", "hash").await.unwrap();
        users.create("bob", "hash").await.unwrap();

        ChatHub::new(MessageRepository::new(pool))
    }

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    fn entries(event: ServerEvent) -> Vec<HistoryEntry> {
        let ServerEvent::History { messages } = event;
        messages
    }

    #[tokio::test]
    async fn new_connection_receives_catch_up_history() {
        let hub = test_hub().await;

        let (tx, mut rx) = channel();
        let id = hub.connect("alice".to_string(), tx).await;
        hub.submit(id, "hello", "2024-01-01T00:00:00Z").await;

        // Catch-up (empty) arrives before the broadcast.
        assert!(entries(rx.recv().await.unwrap()).is_empty());
        let history = entries(rx.recv().await.unwrap());
        assert_eq!(history.len(), 1);

        // A later connection catches up on the same history.
        let (tx2, mut rx2) = channel();
        hub.connect("bob".to_string(), tx2).await;
        assert_eq!(entries(rx2.recv().await.unwrap()), history);
    }

    #[tokio::test]
    async fn submission_is_broadcast_to_everyone_including_sender() {
        let hub = test_hub().await;

        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let alice = hub.connect("alice".to_string(), alice_tx).await;
        hub.connect("bob".to_string(), bob_tx).await;
        alice_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        hub.submit(alice, "hi", "2024-01-01T00:00:00Z").await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let history = entries(rx.recv().await.unwrap());
            assert_eq!(
                history,
                vec![HistoryEntry {
                    user: "alice".to_string(),
                    message: "hi".to_string(),
                    date: "2024-01-01T00:00:00Z".to_string(),
                }]
            );
        }
    }

    #[tokio::test]
    async fn author_comes_from_the_connection_tag() {
        let hub = test_hub().await;

        let (tx, mut rx) = channel();
        let bob = hub.connect("bob".to_string(), tx).await;
        rx.recv().await.unwrap();

        hub.submit(bob, "impersonation attempt", "2024-01-01T00:00:00Z")
            .await;

        let history = entries(rx.recv().await.unwrap());
        assert_eq!(history[0].user, "bob");
    }

    #[tokio::test]
    async fn blank_or_oversized_bodies_are_dropped_silently() {
        let hub = test_hub().await;

        let (tx, mut rx) = channel();
        let id = hub.connect("alice".to_string(), tx).await;
        rx.recv().await.unwrap();

        hub.submit(id, "   \t  ", "2024-01-01T00:00:00Z").await;
        hub.submit(id, "", "2024-01-01T00:00:00Z").await;
        hub.submit(id, &"x".repeat(MAX_BODY_LENGTH + 1), "2024-01-01T00:00:00Z")
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unparseable_timestamps_are_dropped_silently() {
        let hub = test_hub().await;

        let (tx, mut rx) = channel();
        let id = hub.connect("alice".to_string(), tx).await;
        rx.recv().await.unwrap();

        hub.submit(id, "hello", "not-a-date").await;
        hub.submit(id, "hello", "2024-13-99T99:99:99Z").await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn submissions_from_unknown_connections_are_dropped() {
        let hub = test_hub().await;

        let (tx, mut rx) = channel();
        hub.connect("alice".to_string(), tx).await;
        rx.recv().await.unwrap();

        hub.submit(9999, "hello", "2024-01-01T00:00:00Z").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_removes_the_peer_and_is_idempotent() {
        let hub = test_hub().await;

        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let alice = hub.connect("alice".to_string(), alice_tx).await;
        let bob = hub.connect("bob".to_string(), bob_tx).await;
        alice_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        hub.disconnect(bob).await;
        hub.disconnect(bob).await;
        assert_eq!(hub.connection_count().await, 1);

        hub.submit(alice, "anyone there?", "2024-01-01T00:00:00Z")
            .await;

        assert_eq!(entries(alice_rx.recv().await.unwrap()).len(), 1);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sending_to_a_closed_peer_does_not_fault_the_hub() {
        let hub = test_hub().await;

        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, bob_rx) = channel();
        let alice = hub.connect("alice".to_string(), alice_tx).await;
        hub.connect("bob".to_string(), bob_tx).await;
        alice_rx.recv().await.unwrap();

        // Bob's receiver is gone but the peer has not deregistered yet.
        drop(bob_rx);

        hub.submit(alice, "still here", "2024-01-01T00:00:00Z").await;
        assert_eq!(entries(alice_rx.recv().await.unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn history_order_matches_submission_order_for_all_observers() {
        let hub = test_hub().await;

        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let alice = hub.connect("alice".to_string(), alice_tx).await;
        let bob = hub.connect("bob".to_string(), bob_tx).await;
        alice_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        hub.submit(alice, "first", "2024-01-01T00:00:00Z").await;
        hub.submit(bob, "second", "2024-01-01T00:00:01Z").await;
        hub.submit(alice, "third", "2024-01-01T00:00:02Z").await;

        let mut last_alice = None;
        let mut last_bob = None;
        for _ in 0..3 {
            last_alice = Some(entries(alice_rx.recv().await.unwrap()));
            last_bob = Some(entries(bob_rx.recv().await.unwrap()));
        }

        let expected: Vec<_> = ["first", "second", "third"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let bodies = |history: &[HistoryEntry]| -> Vec<String> {
            history.iter().map(|e| e.message.clone()).collect()
        };

        assert_eq!(bodies(&last_alice.unwrap()), expected);
        assert_eq!(bodies(&last_bob.unwrap()), expected);
    }

    #[tokio::test]
    async fn request_history_pushes_only_to_the_requester() {
        let hub = test_hub().await;

        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let alice = hub.connect("alice".to_string(), alice_tx).await;
        hub.connect("bob".to_string(), bob_tx).await;
        alice_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        hub.request_history(alice).await;

        assert!(alice_rx.recv().await.is_some());
        assert!(bob_rx.try_recv().is_err());
    }
}
