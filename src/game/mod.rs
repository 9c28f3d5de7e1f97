//! Game simulation modules

pub mod combat;
pub mod entities;
pub mod r#match;
pub mod orchestrator;
pub mod physics;
pub mod portals;
pub mod powerups;
pub mod snapshot;

pub use entities::{LobbyId, UserId};
pub use orchestrator::Orchestrator;
pub use r#match::{MatchHandle, MatchRegistry};

use uuid::Uuid;

use crate::ws::protocol::ServerMsg;
use entities::{PowerupType, Vec2};

/// Shot requested by a client, already validated per-field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRequest {
    pub position: Vec2,
    pub rotation: f32,
}

/// Ability activation request
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AbilityUse {
    /// Ability the client expected to use
    pub expected: Option<PowerupType>,
}

/// Input accumulated for one player between two ticks
#[derive(Debug, Clone, Default)]
pub struct BufferedInput {
    /// Latest steering value; `None` keeps the previous one
    pub steer: Option<f32>,
    pub shots: Vec<ShotRequest>,
    pub pickups: Vec<Uuid>,
    pub ability_uses: Vec<AbilityUse>,
}

/// Outbound seam used by the simulation; implemented by the connection fabric
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, lobby_id: &str, msg: &ServerMsg);
    fn send_to_user(&self, user_id: UserId, msg: &ServerMsg);
}
