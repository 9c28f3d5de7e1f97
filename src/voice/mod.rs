//! Voice signalling rooms
//!
//! The server only tracks who is in which room and relays opaque WebRTC
//! signalling payloads between two members. Room id is the lobby id.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::{Broadcaster, UserId};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ServerMsg, VoicePeer};

/// Presences idle longer than this are pruned
pub const STALE_PRESENCE_MS: u64 = 5 * 60 * 1000;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Room membership with last-activity time per member
pub struct VoiceRooms {
    rooms: DashMap<String, HashMap<UserId, u64>>,
    broadcaster: Arc<dyn Broadcaster>,
    ice_servers: Value,
}

impl VoiceRooms {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, ice_servers: Value) -> Self {
        Self {
            rooms: DashMap::new(),
            broadcaster,
            ice_servers,
        }
    }

    /// Enter a room. The joiner gets the peer list, everyone else a `voice_peer_joined`.
    pub fn join(&self, room_id: &str, user_id: UserId, now: u64) {
        let (is_new, others) = {
            let mut room = self.rooms.entry(room_id.to_string()).or_default();
            let is_new = room.insert(user_id, now).is_none();
            let others: Vec<UserId> = room.keys().copied().filter(|id| *id != user_id).collect();
            (is_new, others)
        };

        self.send_peer_list(room_id, user_id, &others);

        if is_new {
            info!(room_id = %room_id, user_id = %user_id, "Joined voice room");
            let joined = ServerMsg::VoicePeerJoined {
                room_id: room_id.to_string(),
                user_id,
            };
            for peer in others {
                self.broadcaster.send_to_user(peer, &joined);
            }
        }
    }

    /// Leave a room, notifying whoever remains. Returns false if the user was not in it.
    pub fn leave(&self, room_id: &str, user_id: UserId) -> bool {
        let remaining = {
            let Some(mut room) = self.rooms.get_mut(room_id) else {
                return false;
            };
            if room.remove(&user_id).is_none() {
                return false;
            }
            room.keys().copied().collect::<Vec<_>>()
        };
        self.rooms.remove_if(room_id, |_, room| room.is_empty());

        info!(room_id = %room_id, user_id = %user_id, "Left voice room");
        self.notify_left(room_id, user_id, &remaining);
        true
    }

    /// Leave every room the user is in
    pub fn leave_all(&self, user_id: UserId) {
        let rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|r| r.contains_key(&user_id))
            .map(|r| r.key().clone())
            .collect();
        for room_id in rooms {
            self.leave(&room_id, user_id);
        }
    }

    /// Relay a signalling payload. Both ends must be members of the room.
    pub fn signal(&self, room_id: &str, from: UserId, to: UserId, data: Value, now: u64) -> bool {
        {
            let Some(mut room) = self.rooms.get_mut(room_id) else {
                return false;
            };
            if !room.contains_key(&to) {
                return false;
            }
            match room.get_mut(&from) {
                Some(seen) => *seen = now,
                None => return false,
            }
        }
        self.broadcaster.send_to_user(
            to,
            &ServerMsg::VoiceSignal {
                room_id: room_id.to_string(),
                from_user_id: from,
                data,
            },
        );
        true
    }

    /// Re-send the peer list on request; refreshes the member's presence
    pub fn request_peers(&self, room_id: &str, user_id: UserId, now: u64) {
        let others = {
            let Some(mut room) = self.rooms.get_mut(room_id) else {
                self.send_peer_list(room_id, user_id, &[]);
                return;
            };
            if let Some(seen) = room.get_mut(&user_id) {
                *seen = now;
            }
            room.keys().copied().filter(|id| *id != user_id).collect::<Vec<_>>()
        };
        self.send_peer_list(room_id, user_id, &others);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop presences idle for longer than [`STALE_PRESENCE_MS`]. Returns how many went.
    pub fn sweep(&self, now: u64) -> usize {
        let stale: Vec<(String, UserId)> = self
            .rooms
            .iter()
            .flat_map(|room| {
                let room_id = room.key().clone();
                room.iter()
                    .filter(|(_, seen)| now.saturating_sub(**seen) > STALE_PRESENCE_MS)
                    .map(|(user_id, _)| (room_id.clone(), *user_id))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (room_id, user_id) in &stale {
            debug!(room_id = %room_id, user_id = %user_id, "Pruning stale voice presence");
            self.leave(room_id, *user_id);
        }
        stale.len()
    }

    /// Periodic stale-presence sweep, independent of the game tick
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let pruned = self.sweep(unix_millis());
            if pruned > 0 {
                info!(pruned, "Voice sweep removed stale presences");
            }
        }
    }

    fn send_peer_list(&self, room_id: &str, user_id: UserId, others: &[UserId]) {
        let peers = others
            .iter()
            .map(|peer| VoicePeer {
                user_id: *peer,
                initiator_hint: user_id < *peer,
            })
            .collect();
        self.broadcaster.send_to_user(
            user_id,
            &ServerMsg::VoicePeerList {
                room_id: room_id.to_string(),
                peers,
                ice_servers: self.ice_servers.clone(),
            },
        );
    }

    fn notify_left(&self, room_id: &str, user_id: UserId, remaining: &[UserId]) {
        let left = ServerMsg::VoicePeerLeft {
            room_id: room_id.to_string(),
            user_id,
        };
        for peer in remaining {
            self.broadcaster.send_to_user(*peer, &left);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(UserId, ServerMsg)>>,
    }

    impl Outbox {
        fn take(&self) -> Vec<(UserId, ServerMsg)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl Broadcaster for Outbox {
        fn broadcast(&self, _lobby_id: &str, _msg: &ServerMsg) {}
        fn send_to_user(&self, user_id: UserId, msg: &ServerMsg) {
            self.sent.lock().push((user_id, msg.clone()));
        }
    }

    fn rooms() -> (VoiceRooms, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let rooms = VoiceRooms::new(outbox.clone(), json!([{ "urls": "stun:example.org" }]));
        (rooms, outbox)
    }

    #[test]
    fn join_sends_peer_list_with_initiator_hint() {
        let (rooms, outbox) = rooms();
        let (low, high) = {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            if a < b { (a, b) } else { (b, a) }
        };
        rooms.join("lobby", high, 0);
        outbox.take();

        rooms.join("lobby", low, 10);
        let sent = outbox.take();
        assert_eq!(sent.len(), 2);
        match &sent[0] {
            (to, ServerMsg::VoicePeerList { peers, ice_servers, .. }) => {
                assert_eq!(*to, low);
                assert_eq!(peers, &vec![VoicePeer { user_id: high, initiator_hint: true }]);
                assert_eq!(ice_servers[0]["urls"], "stun:example.org");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            sent[1],
            (high, ServerMsg::VoicePeerJoined { room_id: "lobby".into(), user_id: low })
        );
    }

    #[test]
    fn signal_needs_both_members() {
        let (rooms, outbox) = rooms();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        rooms.join("lobby", a, 0);
        outbox.take();

        assert!(!rooms.signal("lobby", a, b, json!({"sdp": "x"}), 5));
        assert!(outbox.take().is_empty());

        rooms.join("lobby", b, 0);
        outbox.take();
        assert!(rooms.signal("lobby", a, b, json!({"sdp": "x"}), 5));
        let sent = outbox.take();
        assert!(matches!(&sent[..], [(to, ServerMsg::VoiceSignal { from_user_id, .. })] if *to == b && *from_user_id == a));
    }

    #[test]
    fn leaving_last_member_deletes_room() {
        let (rooms, outbox) = rooms();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        rooms.join("lobby", a, 0);
        rooms.join("lobby", b, 0);
        outbox.take();

        assert!(rooms.leave("lobby", a));
        assert_eq!(
            outbox.take(),
            vec![(b, ServerMsg::VoicePeerLeft { room_id: "lobby".into(), user_id: a })]
        );
        assert!(!rooms.leave("lobby", a));
        rooms.leave_all(b);
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn sweep_prunes_idle_presences_only() {
        let (rooms, _outbox) = rooms();
        let idle = Uuid::new_v4();
        let active = Uuid::new_v4();
        rooms.join("lobby", idle, 0);
        rooms.join("lobby", active, 0);
        rooms.request_peers("lobby", active, STALE_PRESENCE_MS);

        assert_eq!(rooms.sweep(STALE_PRESENCE_MS + 1), 1);
        let remaining: Vec<UserId> = rooms.rooms.get("lobby").unwrap().keys().copied().collect();
        assert_eq!(remaining, vec![active]);
    }
}
