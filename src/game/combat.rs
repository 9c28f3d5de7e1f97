//! Combat system - projectiles, damage, death/respawn, win detection

use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{PlayerResult, ServerMsg};

use super::entities::{
    Projectile, UserId, Vec2, ARENA_HEIGHT, ARENA_WIDTH, MAX_HEALTH, PLAYER_RADIUS,
};
use super::physics::PhysicsSystem;
use super::r#match::{GameOver, Match, MatchPhase, TickOutcome};
use super::ShotRequest;

pub const PROJECTILE_SPEED: f32 = 600.0;
/// Radius used against walls
pub const PROJECTILE_RADIUS: f32 = 10.0;
pub const PROJECTILE_LIFETIME_MS: u64 = 2_000;
/// Projectile vs player hit radius
pub const HIT_RADIUS: f32 = 20.0;
pub const PROJECTILE_DAMAGE: u32 = 50;
pub const WALL_DAMAGE_PER_HIT: i32 = 25;
pub const KILLS_TO_WIN: u32 = 5;

/// Client kill reports need a projectile from the killer at most this old...
pub const KILL_REPORT_MAX_AGE_MS: u64 = 500;
/// ...and at most this far from the victim
pub const KILL_REPORT_MAX_DISTANCE: f32 = 48.0;
/// Farthest a reported muzzle may sit from the shooter's centre
pub const MAX_MUZZLE_OFFSET: f32 = PLAYER_RADIUS + 30.0;

impl Projectile {
    /// Build a projectile from a validated shot request
    pub fn fire(shooter_id: UserId, shot: ShotRequest, now: u64) -> Self {
        let position = Vec2::new(
            shot.position.x.clamp(0.0, ARENA_WIDTH),
            shot.position.y.clamp(0.0, ARENA_HEIGHT),
        );
        Self {
            id: Uuid::new_v4(),
            position,
            velocity: Vec2::new(
                shot.rotation.cos() * PROJECTILE_SPEED,
                shot.rotation.sin() * PROJECTILE_SPEED,
            ),
            rotation: shot.rotation,
            shooter_id,
            created_at: now,
        }
    }

    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Combat system for damage bookkeeping
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: u32, damage: u32) -> (u32, bool) {
        let new_health = current_health.saturating_sub(damage).min(MAX_HEALTH);
        (new_health, new_health == 0)
    }
}

/// Outcome of checking a client-reported kill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReportVerdict {
    Corroborated,
    Rejected,
}

impl Match {
    pub(crate) fn spawn_projectile(&mut self, shooter_id: UserId, shot: ShotRequest, now: u64) {
        self.projectiles.push(Projectile::fire(shooter_id, shot, now));
    }

    /// Move projectiles, resolve wall hits, drop expired and out-of-bounds ones
    pub(crate) fn advance_projectiles(&mut self, now: u64, dt: f32, outcome: &mut TickOutcome) {
        self.recent_hits
            .retain(|p| p.age(now) <= KILL_REPORT_MAX_AGE_MS);

        if self.projectiles.is_empty() {
            return;
        }
        outcome.changed = true;

        let lobby_id = &self.lobby_id;
        let walls = &mut self.walls;
        let events = &mut outcome.events;

        self.projectiles.retain_mut(|projectile| {
            projectile.position.x += projectile.velocity.x * dt;
            projectile.position.y += projectile.velocity.y * dt;

            if let Some(idx) = PhysicsSystem::first_wall_hit(projectile.position, PROJECTILE_RADIUS, walls) {
                let wall = &mut walls[idx];
                wall.health -= WALL_DAMAGE_PER_HIT;
                if !wall.is_standing() {
                    info!(lobby_id = %lobby_id, wall_id = wall.id, "Wall destroyed");
                    events.push(ServerMsg::WallDestroyed { wall_id: wall.id });
                    walls.remove(idx);
                }
                return false;
            }

            !PhysicsSystem::out_of_bounds(projectile.position)
                && projectile.age(now) < PROJECTILE_LIFETIME_MS
        });
    }

    /// Projectile vs player pass. Each projectile scores at most one hit and
    /// never hits its own shooter.
    pub(crate) fn resolve_projectile_hits(&mut self, now: u64, outcome: &mut TickOutcome) {
        let mut idx = 0;
        while idx < self.projectiles.len() {
            if self.is_concluded() {
                return;
            }

            let projectile = &self.projectiles[idx];
            let victim = self
                .players
                .values()
                .find(|p| {
                    p.user_id != projectile.shooter_id
                        && PhysicsSystem::circle_intersects_circle(p.position, projectile.position, HIT_RADIUS)
                })
                .map(|p| p.user_id);

            match victim {
                Some(victim_id) => {
                    let projectile = self.projectiles.remove(idx);
                    let shooter_id = projectile.shooter_id;
                    self.recent_hits.push(projectile);
                    self.apply_hit(victim_id, Some(shooter_id), PROJECTILE_DAMAGE, now, outcome);
                }
                None => idx += 1,
            }
        }
    }

    /// Damage a player and run the death path. Returns true if the victim died
    /// (and has already been respawned).
    pub(crate) fn apply_hit(
        &mut self,
        victim_id: UserId,
        attacker_id: Option<UserId>,
        damage: u32,
        now: u64,
        outcome: &mut TickOutcome,
    ) -> bool {
        if self.is_concluded() {
            return false;
        }
        let Some(victim) = self.players.get_mut(&victim_id) else {
            return false;
        };

        let (health, killed) = CombatSystem::apply_damage(victim.health, damage);
        victim.health = health;
        outcome.changed = true;
        if !killed {
            return false;
        }
        victim.deaths += 1;

        // Weak reference: a shooter who already left gets no credit
        let killer_id = attacker_id.filter(|id| *id != victim_id && self.players.contains_key(id));
        let mut winner = None;
        if let Some(killer) = killer_id.and_then(|id| self.players.get_mut(&id)) {
            killer.kills += 1;
            if killer.kills >= KILLS_TO_WIN {
                winner = Some(killer.user_id);
            }
        }

        self.respawn(victim_id);

        info!(
            lobby_id = %self.lobby_id,
            victim_id = %victim_id,
            killer_id = ?killer_id,
            "Player killed"
        );
        outcome.events.push(ServerMsg::Kill {
            killer_id,
            victim_id,
            timestamp: now,
        });

        if let Some(winner_id) = winner {
            self.conclude(winner_id, outcome);
        }
        true
    }

    /// Move a dead player to a safe position at full health
    fn respawn(&mut self, user_id: UserId) {
        let others: Vec<Vec2> = self
            .players
            .values()
            .filter(|p| p.user_id != user_id)
            .map(|p| p.position)
            .collect();
        let position = PhysicsSystem::find_safe_position(&mut self.rng, &self.walls, &others);

        if let Some(player) = self.players.get_mut(&user_id) {
            player.position = position;
            player.health = MAX_HEALTH;
        }
    }

    fn conclude(&mut self, winner_id: UserId, outcome: &mut TickOutcome) {
        if self.is_concluded() {
            return;
        }
        self.phase = MatchPhase::Concluded;
        self.winner_id = Some(winner_id);
        self.beams.clear();

        info!(lobby_id = %self.lobby_id, winner_id = %winner_id, "Match concluded");
        outcome.game_over = Some(GameOver {
            winner_id,
            results: self.results(),
        });
    }

    /// Standings: most kills first, then fewest deaths
    pub fn results(&self) -> Vec<PlayerResult> {
        let mut players: Vec<_> = self.players.values().collect();
        players.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.deaths.cmp(&b.deaths)));

        players
            .into_iter()
            .enumerate()
            .map(|(idx, p)| PlayerResult {
                user_id: p.user_id,
                username: p.username.clone(),
                kills: p.kills,
                deaths: p.deaths,
                placement: idx as u32 + 1,
            })
            .collect()
    }

    /// Check a client kill report against server-tracked projectiles, live or
    /// recently spent on a hit.
    pub fn verify_kill_report(&self, killer_id: UserId, victim_id: UserId, now: u64) -> KillReportVerdict {
        let Some(victim) = self.players.get(&victim_id) else {
            return KillReportVerdict::Rejected;
        };
        let max_dist_sq = KILL_REPORT_MAX_DISTANCE * KILL_REPORT_MAX_DISTANCE;

        let corroborated = self
            .projectiles
            .iter()
            .chain(self.recent_hits.iter())
            .any(|p| {
                p.shooter_id == killer_id
                    && p.age(now) <= KILL_REPORT_MAX_AGE_MS
                    && p.position.distance_sq(victim.position) <= max_dist_sq
            });

        if corroborated {
            KillReportVerdict::Corroborated
        } else {
            debug!(lobby_id = %self.lobby_id, killer_id = %killer_id, victim_id = %victim_id, "Kill report rejected");
            KillReportVerdict::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{Player, Wall, WALL_MAX_HEALTH};
    use crate::game::BufferedInput;
    use std::collections::HashMap;

    const NOW: u64 = 1_000_000;
    const DT: f32 = 0.05;

    fn duel() -> (Match, UserId, UserId) {
        let mut m = Match::with_seed("lobby".into(), 11);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        m.add_player(Player::new(a, "a".into(), 0));
        m.add_player(Player::new(b, "b".into(), 1));
        m.players.get_mut(&a).unwrap().position = Vec2::new(100.0, 100.0);
        m.players.get_mut(&b).unwrap().position = Vec2::new(110.0, 100.0);
        (m, a, b)
    }

    fn lone_shooter(lobby: &str) -> (Match, UserId) {
        let mut m = Match::with_seed(lobby.into(), 5);
        let shooter = Uuid::new_v4();
        m.add_player(Player::new(shooter, "s".into(), 0));
        m.players.get_mut(&shooter).unwrap().position = Vec2::new(640.0, 100.0);
        (m, shooter)
    }

    fn shot_from(user_id: UserId, x: f32, y: f32, rotation: f32) -> HashMap<UserId, BufferedInput> {
        let mut inputs = HashMap::new();
        inputs.insert(
            user_id,
            BufferedInput {
                shots: vec![ShotRequest {
                    position: Vec2::new(x, y),
                    rotation,
                }],
                ..Default::default()
            },
        );
        inputs
    }

    #[test]
    fn damage_saturates_at_zero() {
        assert_eq!(CombatSystem::apply_damage(100, 50), (50, false));
        assert_eq!(CombatSystem::apply_damage(10, 50), (0, true));
    }

    #[test]
    fn shot_damages_without_kill() {
        let (mut m, a, b) = duel();
        let outcome = m.step(shot_from(a, 100.0, 100.0, 0.0), NOW, DT);

        assert_eq!(m.players[&b].health, 50);
        assert!(m.projectiles.is_empty());
        assert!(!outcome.events.iter().any(|e| matches!(e, ServerMsg::Kill { .. })));
        assert!(outcome.game_over.is_none());
    }

    #[test]
    fn lethal_shot_scores_and_respawns() {
        let (mut m, a, b) = duel();
        m.players.get_mut(&b).unwrap().health = 10;

        let outcome = m.step(shot_from(a, 100.0, 100.0, 0.0), NOW, DT);

        let victim = &m.players[&b];
        assert_eq!(m.players[&a].kills, 1);
        assert_eq!(victim.deaths, 1);
        assert_eq!(victim.health, MAX_HEALTH);
        assert!(victim.position.distance_sq(Vec2::new(110.0, 100.0)) > 1.0);
        assert!(!PhysicsSystem::hits_any_wall(victim.position, crate::game::entities::PLAYER_RADIUS, &m.walls));
        assert!(outcome.events.contains(&ServerMsg::Kill {
            killer_id: Some(a),
            victim_id: b,
            timestamp: NOW,
        }));
    }

    #[test]
    fn fifth_kill_concludes_once() {
        let (mut m, a, b) = duel();
        m.players.get_mut(&a).unwrap().kills = 4;
        m.players.get_mut(&b).unwrap().health = 10;

        let outcome = m.step(shot_from(a, 100.0, 100.0, 0.0), NOW, DT);
        let game_over = outcome.game_over.expect("terminal result");
        assert_eq!(game_over.winner_id, a);
        assert_eq!(game_over.results[0].user_id, a);
        assert_eq!(game_over.results[0].placement, 1);
        assert!(m.is_concluded());

        // nothing moves or takes damage afterwards
        let b_state = m.players[&b].clone();
        let b_pos = b_state.position;
        m.players.get_mut(&a).unwrap().position = Vec2::new(b_pos.x - 10.0, b_pos.y);
        let later = m.step(shot_from(a, b_pos.x - 10.0, b_pos.y, 0.0), NOW + 50, DT);
        assert!(later.game_over.is_none());
        assert!(later.events.is_empty());
        assert_eq!(m.players[&b].health, b_state.health);
        assert_eq!(m.players[&b].position, b_pos);
        assert_eq!(m.players[&a].kills, 5);
    }

    #[test]
    fn projectile_never_hits_its_shooter() {
        let (mut m, a, b) = duel();
        m.players.get_mut(&b).unwrap().position = Vec2::new(640.0, 600.0);
        // lands exactly where the shooter moves to this tick
        m.step(shot_from(a, 75.0, 100.0, 0.0), NOW, DT);
        assert_eq!(m.players[&a].health, MAX_HEALTH);
        assert_eq!(m.projectiles.len(), 1);
    }

    #[test]
    fn wall_loses_25_per_hit_and_is_destroyed_once() {
        let (mut m, shooter) = lone_shooter("walls");
        m.walls = vec![Wall::new(7, 400.0, 400.0, false)];

        let mut destroyed = 0;
        for round in 0..6u64 {
            m.players.get_mut(&shooter).unwrap().position = Vec2::new(340.0, 400.0);
            let outcome = m.step(shot_from(shooter, 360.0, 400.0, 0.0), NOW + round * 50, DT);
            destroyed += outcome
                .events
                .iter()
                .filter(|e| matches!(e, ServerMsg::WallDestroyed { wall_id: 7 }))
                .count();
            if let Some(wall) = m.walls.first() {
                assert_eq!((WALL_MAX_HEALTH - wall.health) % WALL_DAMAGE_PER_HIT, 0);
            }
        }
        assert_eq!(destroyed, 1);
        assert!(m.walls.is_empty());
    }

    #[test]
    fn projectiles_expire_by_age() {
        let (mut m, shooter) = lone_shooter("age");
        m.walls.clear();
        m.players.get_mut(&shooter).unwrap().position = Vec2::new(20.0, 360.0);
        m.step(shot_from(shooter, 0.0, 360.0, 0.0), NOW, 0.0);
        assert_eq!(m.projectiles.len(), 1);

        m.step(HashMap::new(), NOW + PROJECTILE_LIFETIME_MS - 1, 0.0);
        assert_eq!(m.projectiles.len(), 1);
        m.step(HashMap::new(), NOW + PROJECTILE_LIFETIME_MS, 0.0);
        assert!(m.projectiles.is_empty());
    }

    #[test]
    fn projectiles_leaving_the_arena_are_dropped() {
        let (mut m, shooter) = lone_shooter("edge");
        m.walls.clear();
        m.players.get_mut(&shooter).unwrap().position = Vec2::new(1250.0, 360.0);

        // 30 units per tick: 1280 is still inside, 1310 is not
        m.step(shot_from(shooter, 1250.0, 360.0, 0.0), NOW, DT);
        assert_eq!(m.projectiles.len(), 1);
        assert_eq!(m.projectiles[0].position.x, 1280.0);

        m.step(HashMap::new(), NOW + 50, DT);
        assert!(m.projectiles.is_empty());

        // same through the top edge
        m.players.get_mut(&shooter).unwrap().position = Vec2::new(640.0, 10.0);
        m.step(
            shot_from(shooter, 640.0, 10.0, -std::f32::consts::FRAC_PI_2),
            NOW + 100,
            DT,
        );
        assert!(m.projectiles.is_empty());
    }

    #[test]
    fn remote_muzzle_fires_from_the_shooter() {
        let mut m = Match::with_seed("muzzle".into(), 3);
        m.walls.clear();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        m.add_player(Player::new(a, "a".into(), 0));
        m.add_player(Player::new(b, "b".into(), 1));
        m.players.get_mut(&a).unwrap().position = Vec2::new(105.0, 100.0);
        m.players.get_mut(&b).unwrap().position = Vec2::new(1000.0, 600.0);

        let outcome = m.step(shot_from(a, 985.0, 600.0, 0.0), NOW, DT);
        assert_eq!(m.players[&b].health, MAX_HEALTH);
        assert!(!outcome.events.iter().any(|e| matches!(e, ServerMsg::Kill { .. })));
        assert_eq!(m.projectiles.len(), 1);
        assert!((m.projectiles[0].position.y - 100.0).abs() < 1e-3);
        assert!((m.projectiles[0].position.x - 135.0).abs() < 1e-3);
    }

    #[test]
    fn nearby_muzzle_is_kept() {
        let (mut m, shooter) = lone_shooter("muzzle");
        m.walls.clear();
        // 40 units ahead of a ship at (640, 100)
        m.step(shot_from(shooter, 680.0, 100.0, 0.0), NOW, 0.0);
        assert_eq!(m.projectiles[0].position, Vec2::new(680.0, 100.0));
    }

    #[test]
    fn kill_report_requires_recent_nearby_projectile() {
        let (mut m, a, b) = duel();
        m.step(shot_from(a, 100.0, 100.0, 0.0), NOW, DT);

        assert_eq!(m.verify_kill_report(a, b, NOW + 100), KillReportVerdict::Corroborated);
        // wrong shooter
        assert_eq!(m.verify_kill_report(b, a, NOW + 100), KillReportVerdict::Rejected);
        // too old
        m.step(HashMap::new(), NOW + 600, DT);
        assert_eq!(m.verify_kill_report(a, b, NOW + 600), KillReportVerdict::Rejected);
    }

    #[test]
    fn results_sort_by_kills_then_deaths() {
        let mut m = Match::with_seed("r".into(), 1);
        let ids: Vec<UserId> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (slot, id) in ids.iter().enumerate() {
            m.add_player(Player::new(*id, format!("p{slot}"), slot));
        }
        m.players.get_mut(&ids[0]).unwrap().kills = 2;
        m.players.get_mut(&ids[1]).unwrap().kills = 2;
        m.players.get_mut(&ids[1]).unwrap().deaths = 3;
        m.players.get_mut(&ids[2]).unwrap().kills = 4;

        let order: Vec<UserId> = m.results().iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);
    }
}
