//! Node-local gateway registries: live SSE connections and the per-user
//! entitlement cache.
//!
//! Each connection owns a bounded outbound queue whose single sender lives in
//! the connection map. Dropping the map entry drops the sender, which ends
//! the client's SSE stream — so "close" and "unregister" are the same move,
//! and a full queue (slow client) closes the connection instead of blocking
//! the fan-out loop.

use std::collections::HashSet;

use dashmap::DashMap;
use tidepool_shared::events::Envelope;
use tidepool_shared::ids::{ChannelId, ConnectionId, UserId};
use tokio::sync::mpsc;

const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub struct GatewayState {
    connections: DashMap<ConnectionId, Connection>,
    entitlements: DashMap<UserId, EntitlementEntry>,
}

struct Connection {
    user_id: UserId,
    sender: mpsc::Sender<Envelope>,
}

/// Channel ids a locally connected user may observe, reference-counted by
/// that user's local connections.
struct EntitlementEntry {
    channels: HashSet<ChannelId>,
    connections: usize,
}

impl GatewayState {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            entitlements: DashMap::new(),
        }
    }

    /// Register a connection, seeding the user's entitlement set on their
    /// first local connection. Returns the receiver for the SSE stream.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        channels: HashSet<ChannelId>,
    ) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.entitlements
            .entry(user_id.clone())
            .and_modify(|entry| entry.connections += 1)
            .or_insert(EntitlementEntry {
                channels,
                connections: 1,
            });
        self.connections.insert(
            connection_id,
            Connection {
                user_id,
                sender: tx,
            },
        );
        rx
    }

    /// Remove a connection, dropping its sender (which ends the stream) and
    /// releasing the entitlement entry when it was the user's last local
    /// connection. Idempotent. Returns the user id on first removal.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> Option<UserId> {
        let (_, connection) = self.connections.remove(connection_id)?;
        let user_id = connection.user_id;
        let mut drop_entry = false;
        if let Some(mut entry) = self.entitlements.get_mut(&user_id) {
            entry.connections = entry.connections.saturating_sub(1);
            drop_entry = entry.connections == 0;
        }
        if drop_entry {
            self.entitlements
                .remove_if(&user_id, |_, entry| entry.connections == 0);
        }
        Some(user_id)
    }

    /// Push a frame onto the connection's queue. Overflow or a gone receiver
    /// closes the connection (the client reconnects with a cursor). Returns
    /// false once the connection is gone.
    pub fn send_or_close(&self, connection_id: &ConnectionId, envelope: Envelope) -> bool {
        let Some(connection) = self.connections.get(connection_id) else {
            return false;
        };
        match connection.sender.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                drop(connection);
                tracing::info!(
                    connection_id = %connection_id,
                    error = %e,
                    "closing connection (queue full or receiver gone)"
                );
                self.remove_connection(connection_id);
                false
            }
        }
    }

    /// Snapshot of (connection, user) pairs for one dispatch pass.
    pub fn connection_snapshot(&self) -> Vec<(ConnectionId, UserId)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().user_id.clone()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_user_connected(&self, user_id: &UserId) -> bool {
        self.entitlements.contains_key(user_id)
    }

    pub fn user_entitled(&self, user_id: &UserId, channel_id: &ChannelId) -> bool {
        self.entitlements
            .get(user_id)
            .is_some_and(|entry| entry.channels.contains(channel_id))
    }

    // ─── Incremental entitlement maintenance ─────────────────

    pub fn grant_channel(&self, user_id: &UserId, channel_id: &ChannelId) {
        if let Some(mut entry) = self.entitlements.get_mut(user_id) {
            entry.channels.insert(channel_id.clone());
        }
    }

    /// Grant to every locally connected user (new public channel).
    pub fn grant_channel_to_all(&self, channel_id: &ChannelId) {
        for mut entry in self.entitlements.iter_mut() {
            entry.channels.insert(channel_id.clone());
        }
    }

    pub fn revoke_channel(&self, user_id: &UserId, channel_id: &ChannelId) {
        if let Some(mut entry) = self.entitlements.get_mut(user_id) {
            entry.channels.remove(channel_id);
        }
    }

    pub fn revoke_channel_everywhere(&self, channel_id: &ChannelId) {
        for mut entry in self.entitlements.iter_mut() {
            entry.channels.remove(channel_id);
        }
    }
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}
