//! Entity model: players, projectiles, walls, pickups, hazards

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::physics::Rect;

/// Authenticated user identity
pub type UserId = Uuid;

/// Opaque lobby identifier handed out by the lobby directory
pub type LobbyId = String;

// Arena
pub const ARENA_WIDTH: f32 = 1280.0;
pub const ARENA_HEIGHT: f32 = 720.0;

// Players
pub const PLAYER_RADIUS: f32 = 25.0;
pub const PLAYER_SPEED: f32 = 200.0;
pub const PLAYER_FORWARD_SPEED: f32 = PLAYER_SPEED * 0.5;
pub const ROTATION_SPEED: f32 = std::f32::consts::PI;
pub const MAX_HEALTH: u32 = 100;

// Walls
pub const WALL_SHORT_SIDE: f32 = 40.0;
pub const WALL_LONG_SIDE: f32 = 100.0;
pub const WALL_MAX_HEALTH: i32 = 100;

/// 2D vector in arena units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Held ability types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupType {
    /// Channelled damage beam along the caster's heading
    AreaBeam,
    /// Short-range swing with knockback
    Melee,
    /// Placeable proximity mine
    ProximityMine,
}

impl PowerupType {
    pub const ALL: [PowerupType; 3] = [
        PowerupType::AreaBeam,
        PowerupType::Melee,
        PowerupType::ProximityMine,
    ];
}

/// Ability currently held by a player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldPowerup {
    #[serde(rename = "type")]
    pub kind: PowerupType,
    pub charges: u32,
    /// Absolute expiry (unix ms); `None` means the ability only runs out of charges
    pub expires_at: Option<u64>,
    /// Last successful use, for cooldown gating
    pub last_used_at: Option<u64>,
}

/// Latest steering input applied every tick until replaced
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SteerInput {
    /// Turn rate multiplier in [-1, 1]
    pub rotation: f32,
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub user_id: UserId,
    pub username: String,

    pub position: Vec2,
    /// Heading in radians, kept within [-2π, 2π]
    pub heading: f32,
    pub current_input: SteerInput,

    /// 0..=100; 0 only transiently before respawn
    pub health: u32,
    pub kills: u32,
    pub deaths: u32,

    /// Slot assigned at join, selects the initial spawn anchor
    pub spawn_slot: usize,
    pub held: Option<HeldPowerup>,
    /// Last portal hop, gates the next one
    pub teleported_at: Option<u64>,
}

impl Player {
    pub fn new(user_id: UserId, username: String, spawn_slot: usize) -> Self {
        Self {
            user_id,
            username,
            position: spawn_anchor(spawn_slot),
            heading: 0.0,
            current_input: SteerInput::default(),
            health: MAX_HEALTH,
            kills: 0,
            deaths: 0,
            spawn_slot,
            held: None,
            teleported_at: None,
        }
    }

    /// Velocity implied by heading; players always move forward
    pub fn velocity(&self) -> Vec2 {
        Vec2::new(
            self.heading.cos() * PLAYER_FORWARD_SPEED,
            self.heading.sin() * PLAYER_FORWARD_SPEED,
        )
    }
}

/// Live projectile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projectile {
    pub id: Uuid,
    pub position: Vec2,
    pub velocity: Vec2,
    pub rotation: f32,
    pub shooter_id: UserId,
    pub created_at: u64,
}

/// Destructible wall segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wall {
    pub id: u32,
    pub position: Vec2,
    pub health: i32,
    /// Long axis horizontal (100 wide, 40 tall) vs vertical (40 wide, 100 tall)
    pub is_horizontal: bool,
}

impl Wall {
    pub fn new(id: u32, x: f32, y: f32, is_horizontal: bool) -> Self {
        Self {
            id,
            position: Vec2::new(x, y),
            health: WALL_MAX_HEALTH,
            is_horizontal,
        }
    }

    pub fn is_standing(&self) -> bool {
        self.health > 0
    }

    pub fn bounds(&self) -> Rect {
        let (width, height) = if self.is_horizontal {
            (WALL_LONG_SIDE, WALL_SHORT_SIDE)
        } else {
            (WALL_SHORT_SIDE, WALL_LONG_SIDE)
        };
        Rect::centered(self.position, width, height)
    }
}

/// Map-spawned ability pickup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pickup {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: PowerupType,
    pub position: Vec2,
    pub collected: bool,
}

/// Placed proximity mine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hazard {
    pub id: Uuid,
    pub owner_id: UserId,
    pub position: Vec2,
    pub armed: bool,
    pub placed_at: u64,
}

/// One end of a teleport pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portal {
    pub id: u32,
    pub position: Vec2,
}

/// Beam channel in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBeam {
    pub owner_id: UserId,
    pub started_at: u64,
    pub ends_at: u64,
    pub next_damage_at: u64,
}

/// Fixed spawn anchors, one per lobby slot
pub const SPAWN_ANCHORS: [Vec2; 4] = [
    Vec2::new(180.0, 125.0),  // top-left
    Vec2::new(1160.0, 125.0), // top-right
    Vec2::new(1160.0, 625.0), // bottom-right
    Vec2::new(180.0, 625.0),  // bottom-left
];

pub fn spawn_anchor(slot: usize) -> Vec2 {
    SPAWN_ANCHORS[slot % SPAWN_ANCHORS.len()]
}

/// Default map: four corner boxes mirrored about both axes plus a centre box
pub fn default_walls() -> Vec<Wall> {
    // (x, y, horizontal) for the top-left box
    const CORNER: [(f32, f32, bool); 8] = [
        (90.0, 40.0, true),
        (190.0, 40.0, true),
        (260.0, 80.0, false),
        (260.0, 180.0, false),
        (90.0, 240.0, true),
        (190.0, 240.0, true),
        (20.0, 80.0, false),
        (20.0, 180.0, false),
    ];
    const CENTER: [(f32, f32, bool); 8] = [
        (590.0, 310.0, true),
        (690.0, 310.0, true),
        (760.0, 350.0, false),
        (760.0, 450.0, false),
        (590.0, 510.0, true),
        (690.0, 510.0, true),
        (520.0, 350.0, false),
        (520.0, 450.0, false),
    ];

    let mirrors: [(bool, bool); 4] = [(false, false), (true, false), (false, true), (true, true)];

    let mut walls = Vec::with_capacity(40);
    for (flip_x, flip_y) in mirrors {
        for (x, y, horizontal) in CORNER {
            let x = if flip_x { ARENA_WIDTH - x } else { x };
            let y = if flip_y { ARENA_HEIGHT - y } else { y };
            walls.push(Wall::new(walls.len() as u32, x, y, horizontal));
        }
    }
    for (x, y, horizontal) in CENTER {
        walls.push(Wall::new(walls.len() as u32, x, y, horizontal));
    }
    walls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_has_forty_full_health_walls() {
        let walls = default_walls();
        assert_eq!(walls.len(), 40);
        assert!(walls.iter().all(|w| w.health == WALL_MAX_HEALTH));
        for (i, w) in walls.iter().enumerate() {
            assert_eq!(w.id as usize, i);
        }
    }

    #[test]
    fn corner_boxes_are_mirrored() {
        let walls = default_walls();
        assert_eq!(walls[8].position, Vec2::new(1190.0, 40.0));
        assert_eq!(walls[16].position, Vec2::new(90.0, 680.0));
        assert_eq!(walls[31].position, Vec2::new(1260.0, 540.0));
    }

    #[test]
    fn orientation_swaps_extents() {
        let horizontal = Wall::new(0, 100.0, 100.0, true).bounds();
        let vertical = Wall::new(1, 100.0, 100.0, false).bounds();
        assert_eq!(horizontal.half_width, 50.0);
        assert_eq!(horizontal.half_height, 20.0);
        assert_eq!(vertical.half_width, 20.0);
        assert_eq!(vertical.half_height, 50.0);
    }

    #[test]
    fn spawn_slot_wraps_around_anchors() {
        assert_eq!(spawn_anchor(5), SPAWN_ANCHORS[1]);
        let player = Player::new(Uuid::new_v4(), "p".into(), 2);
        assert_eq!(player.position, Vec2::new(1160.0, 625.0));
        assert_eq!(player.health, MAX_HEALTH);
    }
}
