//! Powerups - pickup spawning, held abilities, beams and mines

use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

use super::entities::{
    ActiveBeam, Hazard, HeldPowerup, Pickup, PowerupType, UserId, Vec2, PLAYER_RADIUS,
};
use super::physics::PhysicsSystem;
use super::r#match::{Match, TickOutcome};
use super::AbilityUse;

/// Pickup and ability requests collected from one tick's input
pub(crate) type PendingRequests = Vec<(UserId, Vec<Uuid>, Vec<AbilityUse>)>;

pub const PICKUP_RADIUS: f32 = 50.0;
pub const PICKUPS_PER_SET: usize = 2;
/// Delay before a set spawns, after match start or after the previous set is gone
pub const PICKUP_RESPAWN_MS: u64 = 10_000;

pub const BEAM_TICK_MS: u64 = 100;
pub const BEAM_HALF_WIDTH: f32 = 20.0;
pub const MELEE_KNOCKBACK: f32 = 200.0;
pub const MINE_ARM_MS: u64 = 1_000;
pub const MINE_LIFETIME_MS: u64 = 30_000;

/// Fixed parameters per ability
#[derive(Debug, Clone, Copy)]
pub struct AbilityStats {
    /// Damage per application (per beam tick for the beam)
    pub damage: u32,
    /// Beam length, melee reach or mine trigger radius
    pub range: f32,
    /// Channel length for the beam
    pub duration_ms: u64,
    pub cooldown_ms: u64,
    pub charges: u32,
    /// How long the ability can be held after pickup
    pub hold_ms: Option<u64>,
}

impl AbilityStats {
    pub fn for_type(kind: PowerupType) -> Self {
        match kind {
            PowerupType::AreaBeam => Self {
                damage: 10,
                range: 400.0,
                duration_ms: 5_000,
                cooldown_ms: 0,
                charges: 1,
                hold_ms: None,
            },
            PowerupType::Melee => Self {
                damage: 75,
                range: 80.0,
                duration_ms: 0,
                cooldown_ms: 1_000,
                charges: 1,
                hold_ms: Some(10_000),
            },
            PowerupType::ProximityMine => Self {
                damage: 50,
                range: 50.0,
                duration_ms: 0,
                cooldown_ms: 0,
                charges: 3,
                hold_ms: None,
            },
        }
    }
}

impl HeldPowerup {
    pub fn acquire(kind: PowerupType, now: u64) -> Self {
        let stats = AbilityStats::for_type(kind);
        Self {
            kind,
            charges: stats.charges,
            expires_at: stats.hold_ms.map(|hold| now + hold),
            last_used_at: None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn on_cooldown(&self, now: u64) -> bool {
        let cooldown = AbilityStats::for_type(self.kind).cooldown_ms;
        self.last_used_at
            .is_some_and(|used| now.saturating_sub(used) < cooldown)
    }
}

impl Match {
    pub(crate) fn process_requests(&mut self, requests: PendingRequests, now: u64, outcome: &mut TickOutcome) {
        for (user_id, pickups, uses) in requests {
            for pickup_id in pickups {
                self.try_collect(user_id, pickup_id, now, outcome);
            }
            for ability_use in uses {
                self.try_use(user_id, ability_use, now, outcome);
                if self.is_concluded() {
                    return;
                }
            }
        }
    }

    /// Acquire a pickup if the player holds nothing and is close enough
    fn try_collect(&mut self, user_id: UserId, pickup_id: Uuid, now: u64, outcome: &mut TickOutcome) {
        let Some(player) = self.players.get_mut(&user_id) else {
            return;
        };
        if player.held.is_some() {
            return;
        }
        let Some(pickup) = self
            .pickups
            .iter_mut()
            .find(|p| p.id == pickup_id && !p.collected)
        else {
            return;
        };
        if !PhysicsSystem::circle_intersects_circle(player.position, pickup.position, PICKUP_RADIUS) {
            debug!(user_id = %user_id, pickup_id = %pickup_id, "Pickup out of reach");
            return;
        }

        pickup.collected = true;
        player.held = Some(HeldPowerup::acquire(pickup.kind, now));
        outcome.changed = true;
        outcome.events.push(ServerMsg::PowerupCollected {
            user_id,
            powerup_id: pickup_id,
            powerup_type: pickup.kind,
        });

        if self.pickups.iter().all(|p| p.collected) {
            self.pickups.clear();
            self.next_pickup_at = Some(now + PICKUP_RESPAWN_MS);
        }
    }

    /// Re-validates expiry and cooldown at the moment of use
    fn try_use(&mut self, user_id: UserId, ability_use: AbilityUse, now: u64, outcome: &mut TickOutcome) {
        let Some(player) = self.players.get_mut(&user_id) else {
            return;
        };
        let Some(held) = player.held else {
            return;
        };
        if ability_use.expected.is_some_and(|kind| kind != held.kind) {
            return;
        }
        if held.is_expired(now) {
            player.held = None;
            outcome.changed = true;
            return;
        }
        if held.on_cooldown(now) {
            return;
        }

        player.held = match held.kind {
            // single use
            PowerupType::AreaBeam => None,
            PowerupType::Melee => Some(HeldPowerup {
                last_used_at: Some(now),
                ..held
            }),
            PowerupType::ProximityMine => (held.charges > 1).then_some(HeldPowerup {
                charges: held.charges - 1,
                last_used_at: Some(now),
                ..held
            }),
        };
        outcome.changed = true;

        match held.kind {
            PowerupType::AreaBeam => self.start_beam(user_id, now),
            PowerupType::Melee => self.swing_melee(user_id, now, outcome),
            PowerupType::ProximityMine => self.place_mine(user_id, now),
        }
    }

    fn start_beam(&mut self, user_id: UserId, now: u64) {
        let stats = AbilityStats::for_type(PowerupType::AreaBeam);
        self.beams.push(ActiveBeam {
            owner_id: user_id,
            started_at: now,
            ends_at: now + stats.duration_ms,
            next_damage_at: now,
        });
        info!(lobby_id = %self.lobby_id, user_id = %user_id, "Beam started");
    }

    /// Damage everyone in reach and shove survivors away from the caster
    fn swing_melee(&mut self, user_id: UserId, now: u64, outcome: &mut TickOutcome) {
        let stats = AbilityStats::for_type(PowerupType::Melee);
        let Some(caster) = self.players.get(&user_id) else {
            return;
        };
        let origin = caster.position;
        let heading = caster.heading;

        let victims: Vec<UserId> = self
            .players
            .values()
            .filter(|p| p.user_id != user_id)
            .filter(|p| PhysicsSystem::circle_intersects_circle(p.position, origin, stats.range))
            .map(|p| p.user_id)
            .collect();

        for victim_id in victims {
            if self.apply_hit(victim_id, Some(user_id), stats.damage, now, outcome) {
                // respawned elsewhere, nothing to shove
                if self.is_concluded() {
                    return;
                }
                continue;
            }
            self.knock_back(victim_id, origin, heading);
        }
    }

    fn knock_back(&mut self, victim_id: UserId, origin: Vec2, fallback_heading: f32) {
        let Some(victim) = self.players.get_mut(&victim_id) else {
            return;
        };
        let dx = victim.position.x - origin.x;
        let dy = victim.position.y - origin.y;
        let len = (dx * dx + dy * dy).sqrt();
        let (nx, ny) = if len > f32::EPSILON {
            (dx / len, dy / len)
        } else {
            (fallback_heading.cos(), fallback_heading.sin())
        };

        let target = PhysicsSystem::wrap_position(Vec2::new(
            victim.position.x + nx * MELEE_KNOCKBACK,
            victim.position.y + ny * MELEE_KNOCKBACK,
        ));
        // a shove into geometry is skipped
        if !PhysicsSystem::hits_any_wall(target, PLAYER_RADIUS, &self.walls) {
            victim.position = target;
        }
    }

    fn place_mine(&mut self, user_id: UserId, now: u64) {
        let Some(owner) = self.players.get(&user_id) else {
            return;
        };
        self.hazards.push(Hazard {
            id: Uuid::new_v4(),
            owner_id: user_id,
            position: owner.position,
            armed: false,
            placed_at: now,
        });
    }

    /// Apply beam damage on the beam's own cadence and drop finished beams
    pub(crate) fn tick_beams(&mut self, now: u64, outcome: &mut TickOutcome) {
        let players = &self.players;
        self.beams
            .retain(|b| now < b.ends_at && players.contains_key(&b.owner_id));
        if self.beams.is_empty() {
            return;
        }
        outcome.changed = true;

        let mut firing = Vec::new();
        for beam in self.beams.iter_mut() {
            if now >= beam.next_damage_at {
                beam.next_damage_at = now + BEAM_TICK_MS;
                firing.push(beam.owner_id);
            }
        }

        let stats = AbilityStats::for_type(PowerupType::AreaBeam);
        let reach = BEAM_HALF_WIDTH + PLAYER_RADIUS;
        for owner_id in firing {
            let Some(caster) = self.players.get(&owner_id) else {
                continue;
            };
            let start = caster.position;
            let end = Vec2::new(
                start.x + caster.heading.cos() * stats.range,
                start.y + caster.heading.sin() * stats.range,
            );

            let victims: Vec<UserId> = self
                .players
                .values()
                .filter(|p| p.user_id != owner_id)
                .filter(|p| PhysicsSystem::segment_distance_sq(p.position, start, end) <= reach * reach)
                .map(|p| p.user_id)
                .collect();

            for victim_id in victims {
                self.apply_hit(victim_id, Some(owner_id), stats.damage, now, outcome);
                if self.is_concluded() {
                    return;
                }
            }
        }
    }

    /// Arm, expire and trigger placed mines
    pub(crate) fn evaluate_hazards(&mut self, now: u64, outcome: &mut TickOutcome) {
        let before = self.hazards.len();
        self.hazards
            .retain(|h| now.saturating_sub(h.placed_at) < MINE_LIFETIME_MS);
        if self.hazards.len() != before {
            outcome.changed = true;
        }

        for hazard in self.hazards.iter_mut() {
            if !hazard.armed && now.saturating_sub(hazard.placed_at) >= MINE_ARM_MS {
                hazard.armed = true;
                outcome.changed = true;
            }
        }

        let stats = AbilityStats::for_type(PowerupType::ProximityMine);
        let mut idx = 0;
        while idx < self.hazards.len() {
            if self.is_concluded() {
                return;
            }

            let hazard = &self.hazards[idx];
            if !hazard.armed {
                idx += 1;
                continue;
            }
            // Owners never trip their own mines
            let victim = self
                .players
                .values()
                .find(|p| {
                    p.user_id != hazard.owner_id
                        && PhysicsSystem::circle_intersects_circle(p.position, hazard.position, stats.range)
                })
                .map(|p| p.user_id);

            match victim {
                Some(victim_id) => {
                    let hazard = self.hazards.remove(idx);
                    outcome.events.push(ServerMsg::MineExploded {
                        mine_id: hazard.id,
                        victim_id,
                    });
                    self.apply_hit(victim_id, Some(hazard.owner_id), stats.damage, now, outcome);
                }
                None => idx += 1,
            }
        }
    }

    /// Drop held abilities past their hold window
    pub(crate) fn expire_powerups(&mut self, now: u64, outcome: &mut TickOutcome) {
        for player in self.players.values_mut() {
            if player.held.is_some_and(|h| h.is_expired(now)) {
                player.held = None;
                outcome.changed = true;
            }
        }
    }

    /// Spawn a fresh set once the delay has elapsed and no set is live
    pub(crate) fn spawn_pickups_if_due(&mut self, now: u64, outcome: &mut TickOutcome) {
        if !self.pickups.is_empty() || !self.next_pickup_at.is_some_and(|at| now >= at) {
            return;
        }

        let mut occupied: Vec<Vec2> = self.players.values().map(|p| p.position).collect();
        for _ in 0..PICKUPS_PER_SET {
            let kind = PowerupType::ALL[self.rng.gen_range(0..PowerupType::ALL.len())];
            let position = PhysicsSystem::find_safe_position(&mut self.rng, &self.walls, &occupied);
            occupied.push(position);
            self.pickups.push(Pickup {
                id: Uuid::new_v4(),
                kind,
                position,
                collected: false,
            });
        }
        self.next_pickup_at = None;
        outcome.changed = true;

        info!(lobby_id = %self.lobby_id, count = PICKUPS_PER_SET, "Pickups spawned");
    }
}
