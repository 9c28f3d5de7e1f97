//! Collision kernel and movement helpers
//!
//! Everything here is a pure function over entity data. Nothing is cached
//! between ticks because walls can disappear mid-match.

use rand::Rng;

use super::entities::{Vec2, Wall, ARENA_HEIGHT, ARENA_WIDTH, PLAYER_RADIUS};

/// Distance kept from the arena edge when sampling respawn points
pub const SAFE_MARGIN: f32 = 50.0;
/// Sampling budget for the respawn search
pub const SAFE_POSITION_ATTEMPTS: usize = 100;
/// Respawn points must be at least this far from every other player
pub const MIN_SPAWN_DISTANCE: f32 = PLAYER_RADIUS * 3.0;

const TWO_PI: f32 = std::f32::consts::TAU;

/// Axis-aligned rectangle described by its centre and half extents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub center: Vec2,
    pub half_width: f32,
    pub half_height: f32,
}

impl Rect {
    pub fn centered(center: Vec2, width: f32, height: f32) -> Self {
        Self {
            center,
            half_width: width / 2.0,
            half_height: height / 2.0,
        }
    }
}

/// Arena centre, the respawn fallback
pub fn arena_center() -> Vec2 {
    Vec2::new(ARENA_WIDTH / 2.0, ARENA_HEIGHT / 2.0)
}

/// Physics system for movement and overlap tests
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Circle vs AABB via closest-point clamping
    pub fn circle_intersects_rect(center: Vec2, radius: f32, rect: &Rect) -> bool {
        let closest_x = center
            .x
            .clamp(rect.center.x - rect.half_width, rect.center.x + rect.half_width);
        let closest_y = center
            .y
            .clamp(rect.center.y - rect.half_height, rect.center.y + rect.half_height);

        let dx = center.x - closest_x;
        let dy = center.y - closest_y;
        dx * dx + dy * dy < radius * radius
    }

    /// Point-in-range test on squared distance
    pub fn circle_intersects_circle(a: Vec2, b: Vec2, hit_radius: f32) -> bool {
        a.distance_sq(b) <= hit_radius * hit_radius
    }

    /// True if the circle overlaps any standing wall
    pub fn hits_any_wall(center: Vec2, radius: f32, walls: &[Wall]) -> bool {
        walls
            .iter()
            .filter(|w| w.is_standing())
            .any(|w| Self::circle_intersects_rect(center, radius, &w.bounds()))
    }

    /// First standing wall the circle overlaps, by index
    pub fn first_wall_hit(center: Vec2, radius: f32, walls: &[Wall]) -> Option<usize> {
        walls
            .iter()
            .position(|w| w.is_standing() && Self::circle_intersects_rect(center, radius, &w.bounds()))
    }

    /// Keep a heading within [-2π, 2π]; non-finite headings reset to 0
    pub fn normalize_heading(heading: f32) -> f32 {
        if !heading.is_finite() {
            return 0.0;
        }
        if heading > TWO_PI || heading < -TWO_PI {
            heading % TWO_PI
        } else {
            heading
        }
    }

    /// Apply a steering input for one tick
    pub fn steer(heading: f32, rotation_input: f32, rotation_speed: f32, dt: f32) -> f32 {
        Self::normalize_heading(heading + rotation_input * rotation_speed * dt)
    }

    /// Position after moving forward along `heading` for one tick
    pub fn project_forward(position: Vec2, heading: f32, speed: f32, dt: f32) -> Vec2 {
        Vec2::new(
            position.x + heading.cos() * speed * dt,
            position.y + heading.sin() * speed * dt,
        )
    }

    /// Screen-wrap on both axes
    pub fn wrap_position(position: Vec2) -> Vec2 {
        Vec2::new(
            position.x.rem_euclid(ARENA_WIDTH),
            position.y.rem_euclid(ARENA_HEIGHT),
        )
    }

    pub fn out_of_bounds(position: Vec2) -> bool {
        position.x < 0.0 || position.x > ARENA_WIDTH || position.y < 0.0 || position.y > ARENA_HEIGHT
    }

    /// Squared distance from `point` to the segment `a`..`b`
    pub fn segment_distance_sq(point: Vec2, a: Vec2, b: Vec2) -> f32 {
        let abx = b.x - a.x;
        let aby = b.y - a.y;
        let len_sq = abx * abx + aby * aby;
        if len_sq <= f32::EPSILON {
            return point.distance_sq(a);
        }
        let t = (((point.x - a.x) * abx + (point.y - a.y) * aby) / len_sq).clamp(0.0, 1.0);
        point.distance_sq(Vec2::new(a.x + abx * t, a.y + aby * t))
    }

    /// Rejection-sample a respawn point clear of walls and other players.
    ///
    /// Falls back to the arena centre when the attempt budget runs out, even if
    /// that spot is occupied.
    pub fn find_safe_position<R: Rng>(rng: &mut R, walls: &[Wall], others: &[Vec2]) -> Vec2 {
        let min_dist_sq = MIN_SPAWN_DISTANCE * MIN_SPAWN_DISTANCE;

        for _ in 0..SAFE_POSITION_ATTEMPTS {
            let candidate = Vec2::new(
                SAFE_MARGIN + rng.gen::<f32>() * (ARENA_WIDTH - 2.0 * SAFE_MARGIN),
                SAFE_MARGIN + rng.gen::<f32>() * (ARENA_HEIGHT - 2.0 * SAFE_MARGIN),
            );

            if Self::hits_any_wall(candidate, PLAYER_RADIUS, walls) {
                continue;
            }
            if others.iter().any(|p| candidate.distance_sq(*p) < min_dist_sq) {
                continue;
            }
            return candidate;
        }

        arena_center()
    }
}
