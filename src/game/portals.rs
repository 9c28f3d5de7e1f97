//! Paired teleport portals
//!
//! A pair opens at two of eight fixed map openings every 20 s while the
//! round runs and closes 15 s later. A player touching one end comes out of
//! the other.

use rand::Rng;
use tracing::{debug, info};

use crate::ws::protocol::ServerMsg;

use super::entities::{Portal, Vec2, PLAYER_RADIUS};
use super::physics::PhysicsSystem;
use super::r#match::{Match, TickOutcome};

pub const PORTAL_SPAWN_INTERVAL_MS: u64 = 20_000;
pub const PORTAL_LIFETIME_MS: u64 = 15_000;
pub const PORTAL_RADIUS: f32 = 30.0;
/// A player who just hopped ignores portals for this long
pub const TELEPORT_COOLDOWN_MS: u64 = 1_000;

/// Map openings a portal may occupy
pub const PORTAL_SPOTS: [Vec2; 8] = [
    Vec2::new(150.0, 100.0),
    Vec2::new(1130.0, 100.0),
    Vec2::new(100.0, 360.0),
    Vec2::new(1180.0, 360.0),
    Vec2::new(150.0, 620.0),
    Vec2::new(1130.0, 620.0),
    Vec2::new(640.0, 100.0),
    Vec2::new(640.0, 620.0),
];

impl Match {
    /// Open a pair at two distinct spots once the interval has elapsed
    pub(crate) fn spawn_portals_if_due(&mut self, now: u64, outcome: &mut TickOutcome) {
        if !self.portals.is_empty() || !self.next_portal_at.is_some_and(|at| now >= at) {
            return;
        }

        let first = self.rng.gen_range(0..PORTAL_SPOTS.len());
        let mut second = self.rng.gen_range(0..PORTAL_SPOTS.len() - 1);
        if second >= first {
            second += 1;
        }

        self.portals = vec![
            Portal { id: 0, position: PORTAL_SPOTS[first] },
            Portal { id: 1, position: PORTAL_SPOTS[second] },
        ];
        self.portals_close_at = Some(now + PORTAL_LIFETIME_MS);
        self.next_portal_at = Some(now + PORTAL_SPAWN_INTERVAL_MS);
        outcome.changed = true;
        outcome.events.push(ServerMsg::PortalsSpawned {
            portals: self.portals.clone(),
        });

        info!(
            lobby_id = %self.lobby_id,
            a = ?PORTAL_SPOTS[first],
            b = ?PORTAL_SPOTS[second],
            "Portals spawned"
        );
    }

    pub(crate) fn close_portals_if_due(&mut self, now: u64, outcome: &mut TickOutcome) {
        if !self.portals_close_at.is_some_and(|at| now >= at) {
            return;
        }
        self.portals.clear();
        self.portals_close_at = None;
        outcome.changed = true;
        outcome.events.push(ServerMsg::PortalsRemoved);

        info!(lobby_id = %self.lobby_id, "Portals removed");
    }

    /// Move every player touching an open portal to its partner
    pub(crate) fn teleport_through_portals(&mut self, now: u64, outcome: &mut TickOutcome) {
        let [a, b] = self.portals.as_slice() else {
            return;
        };
        let reach = PLAYER_RADIUS + PORTAL_RADIUS;

        for player in self.players.values_mut() {
            if player
                .teleported_at
                .is_some_and(|at| now.saturating_sub(at) < TELEPORT_COOLDOWN_MS)
            {
                continue;
            }

            let (entry, exit) = if PhysicsSystem::circle_intersects_circle(player.position, a.position, reach) {
                (a, b)
            } else if PhysicsSystem::circle_intersects_circle(player.position, b.position, reach) {
                (b, a)
            } else {
                continue;
            };

            player.position = exit.position;
            player.teleported_at = Some(now);
            outcome.changed = true;
            outcome.events.push(ServerMsg::PlayerTeleported {
                user_id: player.user_id,
                portal_id: entry.id,
                position: exit.position,
            });

            debug!(lobby_id = %self.lobby_id, user_id = %player.user_id, portal_id = entry.id, "Player teleported");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::Player;
    use std::collections::HashMap;
    use uuid::Uuid;

    const NOW: u64 = 3_000_000;
    const DT: f32 = 0.05;

    fn started() -> (Match, Uuid) {
        let mut m = Match::with_seed("portals".into(), 17);
        m.walls.clear();
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));
        m.start(NOW);
        (m, id)
    }

    fn open_pair(m: &mut Match, a: Vec2, b: Vec2) {
        m.portals = vec![Portal { id: 0, position: a }, Portal { id: 1, position: b }];
        m.portals_close_at = Some(NOW + PORTAL_LIFETIME_MS);
    }

    fn spawned(outcome: &TickOutcome) -> usize {
        outcome
            .events
            .iter()
            .filter(|e| matches!(e, ServerMsg::PortalsSpawned { .. }))
            .count()
    }

    #[test]
    fn pairs_open_every_twenty_seconds_and_close_after_fifteen() {
        let (mut m, _) = started();

        let early = m.step(HashMap::new(), NOW + PORTAL_SPAWN_INTERVAL_MS - 1, 0.0);
        assert_eq!(spawned(&early), 0);
        assert!(m.portals.is_empty());

        let opened_at = NOW + PORTAL_SPAWN_INTERVAL_MS;
        let outcome = m.step(HashMap::new(), opened_at, 0.0);
        assert_eq!(spawned(&outcome), 1);
        assert_eq!(m.portals.len(), 2);
        assert_eq!((m.portals[0].id, m.portals[1].id), (0, 1));
        assert_ne!(m.portals[0].position, m.portals[1].position);
        assert!(m.portals.iter().all(|p| PORTAL_SPOTS.contains(&p.position)));

        let still_open = m.step(HashMap::new(), opened_at + PORTAL_LIFETIME_MS - 1, 0.0);
        assert!(!still_open.events.contains(&ServerMsg::PortalsRemoved));
        assert_eq!(m.portals.len(), 2);

        let closed = m.step(HashMap::new(), opened_at + PORTAL_LIFETIME_MS, 0.0);
        assert!(closed.changed);
        assert!(closed.events.contains(&ServerMsg::PortalsRemoved));
        assert!(m.portals.is_empty());

        // next pair is measured from the previous opening
        let gap = m.step(HashMap::new(), opened_at + PORTAL_SPAWN_INTERVAL_MS - 1, 0.0);
        assert_eq!(spawned(&gap), 0);
        let next = m.step(HashMap::new(), opened_at + PORTAL_SPAWN_INTERVAL_MS, 0.0);
        assert_eq!(spawned(&next), 1);
    }

    #[test]
    fn no_portals_before_the_round_starts() {
        let mut m = Match::with_seed("portals".into(), 17);
        let outcome = m.step(HashMap::new(), NOW + 10 * PORTAL_SPAWN_INTERVAL_MS, 0.0);
        assert_eq!(spawned(&outcome), 0);
        assert!(m.portals.is_empty());
    }

    #[test]
    fn touching_a_portal_moves_the_player_to_its_partner() {
        let (mut m, id) = started();
        let entry = Vec2::new(150.0, 100.0);
        let exit = Vec2::new(1130.0, 620.0);
        open_pair(&mut m, entry, exit);
        // heading 0 carries the player to 45 units from the entry's centre
        m.players.get_mut(&id).unwrap().position = Vec2::new(100.0, 100.0);

        let outcome = m.step(HashMap::new(), NOW + 50, DT);
        assert_eq!(m.players[&id].position, exit);
        assert!(outcome.events.contains(&ServerMsg::PlayerTeleported {
            user_id: id,
            portal_id: 0,
            position: exit,
        }));

        // standing on the exit does not bounce the player straight back
        let outcome = m.step(HashMap::new(), NOW + 100, DT);
        assert!(!outcome
            .events
            .iter()
            .any(|e| matches!(e, ServerMsg::PlayerTeleported { .. })));
        assert!(m.players[&id].position.distance_sq(exit) < 100.0);
    }

    #[test]
    fn hop_is_allowed_again_after_the_cooldown() {
        let (mut m, id) = started();
        let entry = Vec2::new(640.0, 100.0);
        let exit = Vec2::new(640.0, 620.0);
        open_pair(&mut m, entry, exit);
        let player = m.players.get_mut(&id).unwrap();
        player.position = exit;
        player.teleported_at = Some(NOW);

        m.step(HashMap::new(), NOW + TELEPORT_COOLDOWN_MS - 50, 0.0);
        assert_eq!(m.players[&id].position, exit);

        m.step(HashMap::new(), NOW + TELEPORT_COOLDOWN_MS, 0.0);
        assert_eq!(m.players[&id].position, entry);
    }

    #[test]
    fn players_away_from_portals_stay_put() {
        let (mut m, id) = started();
        open_pair(&mut m, Vec2::new(150.0, 100.0), Vec2::new(1130.0, 620.0));
        m.players.get_mut(&id).unwrap().position = Vec2::new(640.0, 360.0);

        let outcome = m.step(HashMap::new(), NOW + 50, 0.0);
        assert_eq!(m.players[&id].position, Vec2::new(640.0, 360.0));
        assert!(m.players[&id].teleported_at.is_none());
        assert!(!outcome
            .events
            .iter()
            .any(|e| matches!(e, ServerMsg::PlayerTeleported { .. })));
    }
}
