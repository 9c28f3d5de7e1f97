//! Snapshot building and broadcast policy

use crate::util::time::HEARTBEAT_EVERY_TICKS;
use crate::ws::protocol::{GameStateSnapshot, PlayerSnapshot, ServerMsg};

use super::entities::Player;
use super::r#match::Match;

/// Decides when a full `game_state` goes out
pub struct SnapshotBuilder {
    /// Ticks seen so far
    ticks: u64,
    /// Heartbeat interval in ticks
    heartbeat_every: u64,
}

impl SnapshotBuilder {
    pub fn new(heartbeat_every: u64) -> Self {
        Self {
            ticks: 0,
            heartbeat_every: heartbeat_every.max(1),
        }
    }

    /// Send when anything changed, and unconditionally every Nth tick
    pub fn should_send(&mut self, changed: bool) -> bool {
        let heartbeat = self.ticks % self.heartbeat_every == 0;
        self.ticks += 1;
        changed || heartbeat
    }

    /// Build a snapshot message
    pub fn build(state: &Match, now: u64) -> ServerMsg {
        ServerMsg::GameState {
            state: state.snapshot(),
            timestamp: now,
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(HEARTBEAT_EVERY_TICKS)
    }
}

impl Player {
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            user_id: self.user_id,
            username: self.username.clone(),
            position: self.position,
            rotation: self.heading,
            velocity: self.velocity(),
            health: self.health,
            kills: self.kills,
            deaths: self.deaths,
            held_powerup: self.held,
        }
    }
}

impl Match {
    pub fn snapshot(&self) -> GameStateSnapshot {
        GameStateSnapshot {
            players: self
                .players
                .iter()
                .map(|(id, p)| (*id, p.snapshot()))
                .collect(),
            bullets: self.projectiles.clone(),
            walls: self.walls.clone(),
            powerups: self.pickups.iter().filter(|p| !p.collected).cloned().collect(),
            mines: self.hazards.clone(),
            beams: self.beams.clone(),
            portals: self.portals.clone(),
        }
    }
}
