//! Connection fabric: the only owner of live sockets
//!
//! Connections are addressed by id. Each one carries a bounded outbound
//! channel drained by its socket writer task. Frames are serialised once and
//! shared between recipients.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::game::{Broadcaster, LobbyId, UserId};
use crate::ws::protocol::ServerMsg;

pub type ConnectionId = Uuid;

/// Outbound frames buffered per socket before new ones are dropped
pub const OUTBOUND_BUFFER: usize = 256;

struct ConnectionEntry {
    sender: mpsc::Sender<Arc<str>>,
    user_id: Option<UserId>,
    lobby_id: Option<LobbyId>,
}

/// What a removed connection was attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub user_id: Option<UserId>,
    pub lobby_id: Option<LobbyId>,
}

/// Lobby and user indexes over live connections.
///
/// No method holds a guard on one map while touching another.
#[derive(Default)]
pub struct ConnectionFabric {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    lobbies: DashMap<LobbyId, HashSet<ConnectionId>>,
    users: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket; the receiver feeds its writer task
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                user_id: None,
                lobby_id: None,
            },
        );
        (id, receiver)
    }

    /// Bind the socket to a user. Returns false if it is already bound to someone else.
    pub fn bind_user(&self, conn_id: ConnectionId, user_id: UserId) -> bool {
        {
            let Some(mut entry) = self.connections.get_mut(&conn_id) else {
                return false;
            };
            if let Some(existing) = entry.user_id {
                return existing == user_id;
            }
            entry.user_id = Some(user_id);
        }
        self.users.entry(user_id).or_default().insert(conn_id);
        true
    }

    /// Attach the socket to a lobby, leaving any previous one
    pub fn join_lobby(&self, conn_id: ConnectionId, lobby_id: &str) {
        let previous = {
            let Some(mut entry) = self.connections.get_mut(&conn_id) else {
                return;
            };
            entry.lobby_id.replace(lobby_id.to_string())
        };
        if let Some(previous) = previous.filter(|p| p != lobby_id) {
            self.leave_index(&self.lobbies, &previous, conn_id);
        }
        self.lobbies
            .entry(lobby_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Drop a socket. Safe to call more than once.
    pub fn remove(&self, conn_id: ConnectionId) -> Option<Detached> {
        let (_, entry) = self.connections.remove(&conn_id)?;
        if let Some(lobby_id) = &entry.lobby_id {
            self.leave_index(&self.lobbies, lobby_id, conn_id);
        }
        if let Some(user_id) = &entry.user_id {
            self.leave_index(&self.users, user_id, conn_id);
        }
        Some(Detached {
            user_id: entry.user_id,
            lobby_id: entry.lobby_id,
        })
    }

    fn leave_index<K>(&self, index: &DashMap<K, HashSet<ConnectionId>>, key: &K, conn_id: ConnectionId)
    where
        K: std::hash::Hash + Eq,
    {
        index.remove_if_mut(key, |_, members| {
            members.remove(&conn_id);
            members.is_empty()
        });
    }

    /// Send to every socket in a lobby, optionally skipping one
    pub fn broadcast_except(&self, lobby_id: &str, msg: &ServerMsg, exclude: Option<ConnectionId>) {
        let members: Vec<ConnectionId> = match self.lobbies.get(lobby_id) {
            Some(set) => set.iter().copied().filter(|id| Some(*id) != exclude).collect(),
            None => return,
        };
        if members.is_empty() {
            return;
        }
        let Some(frame) = encode(msg) else {
            return;
        };
        for conn_id in members {
            self.deliver(conn_id, &frame);
        }
    }

    /// Send to every socket bound to the user; a no-op when there are none
    pub fn send_to_user(&self, user_id: UserId, msg: &ServerMsg) {
        let targets: Vec<ConnectionId> = match self.users.get(&user_id) {
            Some(set) => set.iter().copied().collect(),
            None => {
                debug!(user_id = %user_id, "No live sockets for user");
                return;
            }
        };
        let Some(frame) = encode(msg) else {
            return;
        };
        for conn_id in targets {
            self.deliver(conn_id, &frame);
        }
    }

    pub fn send_to_connection(&self, conn_id: ConnectionId, msg: &ServerMsg) {
        if let Some(frame) = encode(msg) {
            self.deliver(conn_id, &frame);
        }
    }

    fn deliver(&self, conn_id: ConnectionId, frame: &Arc<str>) {
        let Some(sender) = self.connections.get(&conn_id).map(|c| c.sender.clone()) else {
            return;
        };
        match sender.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %conn_id, "Outbound buffer full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %conn_id, "Writer gone, frame discarded");
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn lobby_connection_count(&self, lobby_id: &str) -> usize {
        self.lobbies.get(lobby_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Broadcaster for ConnectionFabric {
    fn broadcast(&self, lobby_id: &str, msg: &ServerMsg) {
        self.broadcast_except(lobby_id, msg, None);
    }

    fn send_to_user(&self, user_id: UserId, msg: &ServerMsg) {
        ConnectionFabric::send_to_user(self, user_id, msg);
    }
}

fn encode(msg: &ServerMsg) -> Option<Arc<str>> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!(error = %e, "Failed to serialise outbound frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_type(frame: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn broadcast_reaches_lobby_members_except_excluded() {
        let fabric = ConnectionFabric::new();
        let (a, mut rx_a) = fabric.register();
        let (b, mut rx_b) = fabric.register();
        let (other, mut rx_other) = fabric.register();
        fabric.join_lobby(a, "l1");
        fabric.join_lobby(b, "l1");
        fabric.join_lobby(other, "l2");

        fabric.broadcast_except("l1", &ServerMsg::WallDestroyed { wall_id: 3 }, Some(a));

        assert_eq!(frame_type(&rx_b.recv().await.unwrap()), "wall_destroyed");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_hits_every_bound_socket() {
        let fabric = ConnectionFabric::new();
        let user = Uuid::new_v4();
        let (game, mut rx_game) = fabric.register();
        let (voice, mut rx_voice) = fabric.register();
        assert!(fabric.bind_user(game, user));
        assert!(fabric.bind_user(voice, user));
        assert!(!fabric.bind_user(voice, Uuid::new_v4()));

        fabric.send_to_user(user, &ServerMsg::error("x"));
        assert_eq!(frame_type(&rx_game.recv().await.unwrap()), "error");
        assert_eq!(frame_type(&rx_voice.recv().await.unwrap()), "error");

        // unknown users are a silent no-op
        fabric.send_to_user(Uuid::new_v4(), &ServerMsg::error("y"));
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_cleans_indexes() {
        let fabric = ConnectionFabric::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = fabric.register();
        fabric.bind_user(conn, user);
        fabric.join_lobby(conn, "l1");

        let detached = fabric.remove(conn).unwrap();
        assert_eq!(detached.user_id, Some(user));
        assert_eq!(detached.lobby_id.as_deref(), Some("l1"));
        assert!(fabric.remove(conn).is_none());
        assert_eq!(fabric.connection_count(), 0);
        assert_eq!(fabric.lobby_connection_count("l1"), 0);
    }

    #[tokio::test]
    async fn switching_lobbies_leaves_the_old_one() {
        let fabric = ConnectionFabric::new();
        let (conn, _rx) = fabric.register();
        fabric.join_lobby(conn, "l1");
        fabric.join_lobby(conn, "l2");
        assert_eq!(fabric.lobby_connection_count("l1"), 0);
        assert_eq!(fabric.lobby_connection_count("l2"), 1);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let fabric = ConnectionFabric::new();
        let (conn, mut rx) = fabric.register();
        fabric.join_lobby(conn, "l1");
        for _ in 0..OUTBOUND_BUFFER + 10 {
            fabric.broadcast_except("l1", &ServerMsg::PlayerLeft { user_id: Uuid::nil() }, None);
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, OUTBOUND_BUFFER);
    }
}
