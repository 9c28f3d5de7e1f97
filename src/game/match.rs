//! Match state, per-tick pipeline and the lobby-keyed registry

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{PlayerResult, ServerMsg};

use super::entities::{
    default_walls, ActiveBeam, Hazard, LobbyId, Pickup, Player, Portal, Projectile, UserId, Wall,
    PLAYER_FORWARD_SPEED, PLAYER_RADIUS, ROTATION_SPEED,
};
use super::combat::MAX_MUZZLE_OFFSET;
use super::physics::PhysicsSystem;
use super::portals::PORTAL_SPAWN_INTERVAL_MS;
use super::powerups::{PendingRequests, PICKUP_RESPAWN_MS};
use super::snapshot::SnapshotBuilder;
use super::{BufferedInput, ShotRequest};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Players may join and move around; no pickups spawn
    Waiting,
    /// Round running
    InProgress,
    /// A player reached the kill target; combat state is frozen
    Concluded,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Waiting => "waiting",
            MatchPhase::InProgress => "in_progress",
            MatchPhase::Concluded => "concluded",
        }
    }
}

/// Terminal result reported by the tick that concluded the match
#[derive(Debug, Clone, PartialEq)]
pub struct GameOver {
    pub winner_id: UserId,
    pub results: Vec<PlayerResult>,
}

/// Everything one tick produced
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Any observable field changed
    pub changed: bool,
    /// Discrete events, in the order they happened
    pub events: Vec<ServerMsg>,
    pub game_over: Option<GameOver>,
}

/// Authoritative state for one lobby
pub struct Match {
    pub lobby_id: LobbyId,
    pub phase: MatchPhase,
    pub tick: u64,
    pub players: BTreeMap<UserId, Player>,
    pub projectiles: Vec<Projectile>,
    pub walls: Vec<Wall>,
    pub pickups: Vec<Pickup>,
    pub hazards: Vec<Hazard>,
    pub beams: Vec<ActiveBeam>,
    /// Open portal pair, empty or exactly two
    pub portals: Vec<Portal>,
    /// Projectiles consumed by a hit, kept briefly to corroborate kill reports
    pub(crate) recent_hits: Vec<Projectile>,
    pub rng: ChaCha8Rng,
    /// Durable session row, assigned on start
    pub session_id: Option<Uuid>,
    pub started_at: Option<u64>,
    pub next_pickup_at: Option<u64>,
    pub next_portal_at: Option<u64>,
    pub portals_close_at: Option<u64>,
    pub winner_id: Option<UserId>,
    pub snapshots: SnapshotBuilder,
}

impl Match {
    pub fn new(lobby_id: LobbyId) -> Self {
        Self::with_seed(lobby_id, rand::random())
    }

    pub fn with_seed(lobby_id: LobbyId, seed: u64) -> Self {
        Self {
            lobby_id,
            phase: MatchPhase::Waiting,
            tick: 0,
            players: BTreeMap::new(),
            projectiles: Vec::new(),
            walls: default_walls(),
            pickups: Vec::new(),
            hazards: Vec::new(),
            beams: Vec::new(),
            portals: Vec::new(),
            recent_hits: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            session_id: None,
            started_at: None,
            next_pickup_at: None,
            next_portal_at: None,
            portals_close_at: None,
            winner_id: None,
            snapshots: SnapshotBuilder::default(),
        }
    }

    pub fn is_concluded(&self) -> bool {
        self.phase == MatchPhase::Concluded
    }

    /// Waiting -> InProgress. Returns the new session id, or `None` if the
    /// match was not waiting.
    pub fn start(&mut self, now: u64) -> Option<Uuid> {
        if self.phase != MatchPhase::Waiting {
            return None;
        }
        let session_id = Uuid::new_v4();
        self.phase = MatchPhase::InProgress;
        self.session_id = Some(session_id);
        self.started_at = Some(now);
        self.next_pickup_at = Some(now + PICKUP_RESPAWN_MS);
        self.next_portal_at = Some(now + PORTAL_SPAWN_INTERVAL_MS);

        info!(lobby_id = %self.lobby_id, session_id = %session_id, players = self.players.len(), "Match started");
        Some(session_id)
    }

    /// Insert a player unless already present. Returns false for a re-join.
    pub fn add_player(&mut self, player: Player) -> bool {
        if self.players.contains_key(&player.user_id) {
            return false;
        }
        self.players.insert(player.user_id, player);
        true
    }

    /// Remove a player; their projectiles and mines stay live, their beam ends
    pub fn remove_player(&mut self, user_id: UserId) -> Option<Player> {
        let player = self.players.remove(&user_id)?;
        self.beams.retain(|b| b.owner_id != user_id);
        Some(player)
    }

    /// Advance the simulation by one fixed step
    pub fn step(&mut self, inputs: HashMap<UserId, BufferedInput>, now: u64, dt: f32) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.is_concluded() {
            return outcome;
        }
        self.tick += 1;

        let requests = self.apply_inputs(inputs, now, &mut outcome);
        self.move_players(dt, &mut outcome);
        self.teleport_through_portals(now, &mut outcome);
        self.advance_projectiles(now, dt, &mut outcome);
        self.resolve_projectile_hits(now, &mut outcome);
        if self.is_concluded() {
            return outcome;
        }

        self.evaluate_hazards(now, &mut outcome);
        if self.is_concluded() {
            return outcome;
        }

        self.process_requests(requests, now, &mut outcome);
        if self.is_concluded() {
            return outcome;
        }

        self.tick_beams(now, &mut outcome);
        if self.is_concluded() {
            return outcome;
        }

        self.expire_powerups(now, &mut outcome);
        self.close_portals_if_due(now, &mut outcome);
        if self.phase == MatchPhase::InProgress {
            self.spawn_pickups_if_due(now, &mut outcome);
            self.spawn_portals_if_due(now, &mut outcome);
        }

        debug!(lobby_id = %self.lobby_id, tick = self.tick, events = outcome.events.len(), "Tick");
        outcome
    }

    /// Fold buffered input into player state and spawn requested shots.
    /// Pickup and ability requests are returned for a later stage.
    fn apply_inputs(
        &mut self,
        inputs: HashMap<UserId, BufferedInput>,
        now: u64,
        outcome: &mut TickOutcome,
    ) -> PendingRequests {
        let mut requests = PendingRequests::new();

        // Fixed player order keeps projectile ordering reproducible
        let mut inputs: Vec<_> = inputs.into_iter().collect();
        inputs.sort_by_key(|(user_id, _)| *user_id);

        for (user_id, input) in inputs {
            let Some(player) = self.players.get_mut(&user_id) else {
                continue;
            };

            // Steering is a turn rate in [-1, 1]
            if let Some(steer) = input.steer.filter(|s| s.is_finite()) {
                player.current_input.rotation = steer.clamp(-1.0, 1.0);
            }
            let origin = player.position;

            for mut shot in input.shots {
                if !shot.rotation.is_finite() || !shot.position.is_finite() {
                    continue;
                }
                // The client muzzle is a hint; one far from the ship fires from the ship
                if shot.position.distance_sq(origin) > MAX_MUZZLE_OFFSET * MAX_MUZZLE_OFFSET {
                    debug!(lobby_id = %self.lobby_id, user_id = %user_id, muzzle = ?shot.position, "Muzzle too far from shooter, snapped");
                    shot.position = origin;
                }
                self.spawn_projectile(user_id, shot, now);
                outcome.changed = true;
            }

            if !input.pickups.is_empty() || !input.ability_uses.is_empty() {
                requests.push((user_id, input.pickups, input.ability_uses));
            }
        }

        requests
    }

    /// Steer, then move forward unless a wall blocks the projected position
    fn move_players(&mut self, dt: f32, outcome: &mut TickOutcome) {
        for player in self.players.values_mut() {
            player.heading = PhysicsSystem::steer(
                player.heading,
                player.current_input.rotation,
                ROTATION_SPEED,
                dt,
            );

            let projected =
                PhysicsSystem::project_forward(player.position, player.heading, PLAYER_FORWARD_SPEED, dt);

            // Blocked players stay put but still count as changed to force a resync
            if !PhysicsSystem::hits_any_wall(projected, PLAYER_RADIUS, &self.walls) {
                player.position = PhysicsSystem::wrap_position(projected);
            }
            outcome.changed = true;
        }
    }
}

/// Handle to a live match, shared by the socket handlers and the orchestrator
#[derive(Clone)]
pub struct MatchHandle {
    pub lobby_id: LobbyId,
    state: Arc<Mutex<Match>>,
    inputs: Arc<Mutex<HashMap<UserId, BufferedInput>>>,
    player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn new(state: Match) -> Self {
        Self {
            lobby_id: state.lobby_id.clone(),
            player_count: Arc::new(AtomicUsize::new(state.players.len())),
            state: Arc::new(Mutex::new(state)),
            inputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `f` under the match lock
    pub fn update<R>(&self, f: impl FnOnce(&mut Match) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        self.player_count.store(state.players.len(), Ordering::Relaxed);
        result
    }

    /// Mutate the buffered input for one player without touching the match lock
    pub fn with_input<R>(&self, user_id: UserId, f: impl FnOnce(&mut BufferedInput) -> R) -> R {
        let mut inputs = self.inputs.lock();
        f(inputs.entry(user_id).or_default())
    }

    /// Swap out everything buffered since the previous tick
    pub fn take_inputs(&self) -> HashMap<UserId, BufferedInput> {
        std::mem::take(&mut *self.inputs.lock())
    }

    /// Discard whatever a player buffered
    pub fn take_input(&self, user_id: UserId) -> Option<BufferedInput> {
        self.inputs.lock().remove(&user_id)
    }

    /// Queue a shot for the next tick
    pub fn push_shot(&self, user_id: UserId, shot: ShotRequest) {
        self.with_input(user_id, |input| input.shots.push(shot));
    }

    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all live matches, keyed by lobby
pub struct MatchRegistry {
    matches: DashMap<LobbyId, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, lobby_id: &str) -> Option<MatchHandle> {
        self.matches.get(lobby_id).map(|m| m.value().clone())
    }

    /// Fetch the lobby's match, creating it on first use
    pub fn get_or_create(&self, lobby_id: &str) -> MatchHandle {
        self.matches
            .entry(lobby_id.to_string())
            .or_insert_with(|| {
                info!(lobby_id = %lobby_id, "Match created");
                MatchHandle::new(Match::new(lobby_id.to_string()))
            })
            .value()
            .clone()
    }

    pub fn remove(&self, lobby_id: &str) -> Option<MatchHandle> {
        self.matches.remove(lobby_id).map(|(_, h)| h)
    }

    /// Snapshot of every live handle, taken without holding shard locks afterwards
    pub fn handles(&self) -> Vec<MatchHandle> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{Vec2, MAX_HEALTH};

    const NOW: u64 = 5_000_000;

    fn steer(rotation: f32) -> BufferedInput {
        BufferedInput {
            steer: Some(rotation),
            ..Default::default()
        }
    }

    #[test]
    fn players_move_forward_and_wrap() {
        let mut m = Match::with_seed("l".into(), 1);
        m.walls.clear();
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));
        m.players.get_mut(&id).unwrap().position = Vec2::new(1279.0, 360.0);

        let outcome = m.step(HashMap::new(), NOW, 0.05);
        assert!(outcome.changed);
        let pos = m.players[&id].position;
        assert!((pos.x - 4.0).abs() < 1e-3, "wrapped to {pos:?}");
    }

    #[test]
    fn walls_block_movement() {
        let mut m = Match::with_seed("l".into(), 1);
        m.walls = vec![Wall::new(0, 240.0, 360.0, false)];
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));
        // projected x=197 sits 23 units from the wall face at x=220
        m.players.get_mut(&id).unwrap().position = Vec2::new(192.0, 360.0);

        let outcome = m.step(HashMap::new(), NOW, 0.05);
        assert!(outcome.changed);
        assert_eq!(m.players[&id].position, Vec2::new(192.0, 360.0));
    }

    #[test]
    fn steering_persists_and_is_clamped() {
        let mut m = Match::with_seed("l".into(), 1);
        m.walls.clear();
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));

        let mut inputs = HashMap::new();
        inputs.insert(id, steer(7.0));
        m.step(inputs, NOW, 0.05);
        assert_eq!(m.players[&id].current_input.rotation, 1.0);

        // non-finite steering keeps the previous value
        let mut inputs = HashMap::new();
        inputs.insert(id, steer(f32::NAN));
        m.step(inputs, NOW + 50, 0.05);
        assert_eq!(m.players[&id].current_input.rotation, 1.0);
        assert!(m.players[&id].heading > 0.0);
    }

    #[test]
    fn steering_below_range_is_clamped_too() {
        let mut m = Match::with_seed("l".into(), 1);
        m.walls.clear();
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));

        let mut inputs = HashMap::new();
        inputs.insert(id, steer(-40.0));
        m.step(inputs, NOW, 0.05);
        assert_eq!(m.players[&id].current_input.rotation, -1.0);
        // one tick at full turn rate
        let expected = -ROTATION_SPEED * 0.05;
        assert!((m.players[&id].heading - expected).abs() < 1e-5);
    }

    #[test]
    fn malformed_shots_are_dropped() {
        let mut m = Match::with_seed("l".into(), 1);
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));

        let mut inputs = HashMap::new();
        inputs.insert(
            id,
            BufferedInput {
                shots: vec![
                    ShotRequest { position: Vec2::new(640.0, 100.0), rotation: f32::INFINITY },
                    ShotRequest { position: Vec2::new(f32::NAN, 100.0), rotation: 0.0 },
                ],
                ..Default::default()
            },
        );
        m.step(inputs, NOW, 0.05);
        assert!(m.projectiles.is_empty());
    }

    #[test]
    fn inputs_for_unknown_players_are_ignored() {
        let mut m = Match::with_seed("l".into(), 1);
        let mut inputs = HashMap::new();
        inputs.insert(Uuid::new_v4(), steer(1.0));
        m.step(inputs, NOW, 0.05);
        assert!(m.players.is_empty());
    }

    #[test]
    fn health_stays_in_range_over_many_ticks() {
        let mut m = Match::with_seed("l".into(), 9);
        let ids: Vec<UserId> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (slot, id) in ids.iter().enumerate() {
            m.add_player(Player::new(*id, format!("p{slot}"), slot));
        }
        m.start(NOW);

        for tick in 0..400u64 {
            let mut inputs = HashMap::new();
            for (i, id) in ids.iter().enumerate() {
                let p = &m.players[id];
                inputs.insert(
                    *id,
                    BufferedInput {
                        steer: Some(if i % 2 == 0 { 0.5 } else { -0.5 }),
                        shots: vec![ShotRequest { position: p.position, rotation: p.heading }],
                        ..Default::default()
                    },
                );
            }
            m.step(inputs, NOW + tick * 50, 0.05);
            for p in m.players.values() {
                assert!(p.health <= MAX_HEALTH);
                assert!(p.heading.is_finite());
            }
            if m.is_concluded() {
                break;
            }
        }
    }

    #[test]
    fn start_only_from_waiting() {
        let mut m = Match::with_seed("l".into(), 1);
        assert!(m.start(NOW).is_some());
        assert_eq!(m.phase, MatchPhase::InProgress);
        assert_eq!(m.next_pickup_at, Some(NOW + PICKUP_RESPAWN_MS));
        assert_eq!(m.next_portal_at, Some(NOW + PORTAL_SPAWN_INTERVAL_MS));
        assert!(m.start(NOW + 1).is_none());
    }

    #[test]
    fn leaving_keeps_projectiles_but_ends_beams() {
        let mut m = Match::with_seed("l".into(), 1);
        let id = Uuid::new_v4();
        m.add_player(Player::new(id, "p".into(), 0));
        m.spawn_projectile(id, ShotRequest { position: Vec2::new(640.0, 100.0), rotation: 0.0 }, NOW);
        m.beams.push(ActiveBeam { owner_id: id, started_at: NOW, ends_at: NOW + 5_000, next_damage_at: NOW });

        assert!(m.remove_player(id).is_some());
        assert!(m.remove_player(id).is_none());
        assert_eq!(m.projectiles.len(), 1);
        assert!(m.beams.is_empty());
    }

    #[test]
    fn registry_creates_once_per_lobby() {
        let registry = MatchRegistry::new();
        let first = registry.get_or_create("abc");
        let second = registry.get_or_create("abc");
        first.update(|m| m.add_player(Player::new(Uuid::new_v4(), "p".into(), 0)));

        assert_eq!(registry.active_matches(), 1);
        assert_eq!(second.player_count(), 1);
        assert_eq!(registry.total_players(), 1);
        assert!(registry.remove("abc").is_some());
        assert!(registry.get("abc").is_none());
    }

    #[test]
    fn input_buffer_is_swapped_out() {
        let handle = MatchHandle::new(Match::with_seed("l".into(), 1));
        let id = Uuid::new_v4();
        handle.with_input(id, |i| i.steer = Some(0.25));
        handle.push_shot(id, ShotRequest { position: Vec2::new(1.0, 1.0), rotation: 0.0 });

        let taken = handle.take_inputs();
        assert_eq!(taken[&id].steer, Some(0.25));
        assert_eq!(taken[&id].shots.len(), 1);
        assert!(handle.take_inputs().is_empty());
    }
}
