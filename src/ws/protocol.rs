//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

use crate::game::entities::{
    ActiveBeam, Hazard, HeldPowerup, Pickup, Portal, PowerupType, Projectile, UserId, Vec2, Wall,
};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Enter the match for a lobby (creates it on first join)
    JoinGame {
        lobby_id: String,
        user_id: UserId,
        #[serde(default)]
        username: Option<String>,
    },

    /// Steering and optional shot
    PlayerInput {
        user_id: UserId,
        #[serde(default)]
        input: InputPayload,
    },

    /// Collect a map pickup
    PickupPowerup { user_id: UserId, powerup_id: Uuid },

    /// Activate the held ability
    UsePowerup {
        user_id: UserId,
        #[serde(default)]
        data: UsePowerupData,
    },

    /// Client-reported kill, advisory only
    Kill {
        killer_id: UserId,
        victim_id: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
    },

    /// Host starts the round
    StartGame { lobby_id: String },

    /// Host sends everyone back to the waiting room
    HostReturnToWaiting { lobby_id: String },

    JoinedVoice { room_id: String, user_id: UserId },

    LeaveVoice { room_id: String, user_id: UserId },

    /// Opaque signalling payload relayed to one peer
    VoiceSignal {
        room_id: String,
        from_user_id: UserId,
        to_user_id: UserId,
        data: serde_json::Value,
    },

    RequestVoicePeers { room_id: String, user_id: UserId },

    /// Cosmetic sound cue relayed to the rest of the lobby
    PlaySound {
        #[serde(default)]
        sound: Option<String>,
        #[serde(default, deserialize_with = "lenient_vec2")]
        position: Option<Vec2>,
    },

    /// Client-side teleport notice. Portals resolve on the server, so the
    /// reported position is never applied.
    PlayerTeleported { user_id: UserId },

    /// Client-computed results. Results come from the server's own scoring.
    EndGame { lobby_id: String },
}

impl ClientMsg {
    /// Acting user named by the frame, if any
    pub fn acting_user(&self) -> Option<UserId> {
        match self {
            ClientMsg::JoinGame { user_id, .. }
            | ClientMsg::PlayerInput { user_id, .. }
            | ClientMsg::PickupPowerup { user_id, .. }
            | ClientMsg::UsePowerup { user_id, .. }
            | ClientMsg::JoinedVoice { user_id, .. }
            | ClientMsg::LeaveVoice { user_id, .. }
            | ClientMsg::RequestVoicePeers { user_id, .. }
            | ClientMsg::PlayerTeleported { user_id } => Some(*user_id),
            ClientMsg::VoiceSignal { from_user_id, .. } => Some(*from_user_id),
            ClientMsg::Kill { .. }
            | ClientMsg::StartGame { .. }
            | ClientMsg::HostReturnToWaiting { .. }
            | ClientMsg::PlaySound { .. }
            | ClientMsg::EndGame { .. } => None,
        }
    }
}

/// Per-frame input. Malformed numeric fields decode to `None` instead of
/// failing the whole frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    #[serde(default, deserialize_with = "lenient_f32")]
    pub rotation: Option<f32>,
    #[serde(default)]
    pub shoot: Option<ShootPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootPayload {
    #[serde(default, deserialize_with = "lenient_vec2")]
    pub position: Option<Vec2>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub rotation: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsePowerupData {
    /// Ability the client believes it is using; a mismatch rejects the use
    #[serde(default, rename = "type")]
    pub powerup_type: Option<PowerupType>,
}

fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(finite_f32))
}

fn lenient_vec2<'de, D>(deserializer: D) -> Result<Option<Vec2>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        let x = v.get("x").and_then(finite_f32)?;
        let y = v.get("y").and_then(finite_f32)?;
        Some(Vec2::new(x, y))
    }))
}

fn finite_f32(value: &serde_json::Value) -> Option<f32> {
    value
        .as_f64()
        .map(|v| v as f32)
        .filter(|v| v.is_finite())
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Sent to the joiner only
    Joined {
        lobby_id: String,
        user_id: UserId,
        players: Vec<PlayerSnapshot>,
        walls: Vec<Wall>,
        portals: Vec<Portal>,
    },

    /// Cosmetic selections from the lobby directory
    PlayerModelState {
        lobby_id: String,
        player_models: HashMap<UserId, Option<String>>,
    },

    PlayerJoined { user_id: UserId, username: String },

    PlayerLeft { user_id: UserId },

    GameStarted { lobby_id: String, timestamp: u64 },

    /// Full authoritative snapshot
    GameState {
        state: GameStateSnapshot,
        timestamp: u64,
    },

    WallDestroyed { wall_id: u32 },

    /// A fresh portal pair opened
    PortalsSpawned { portals: Vec<Portal> },

    PortalsRemoved,

    /// Server-resolved portal hop
    PlayerTeleported {
        user_id: UserId,
        portal_id: u32,
        position: Vec2,
    },

    /// Relayed sound cue; `position` is null for non-positional sounds
    PlaySound {
        sound: String,
        position: Option<Vec2>,
    },

    /// `killer_id` is empty when the killer has left the match
    Kill {
        killer_id: Option<UserId>,
        victim_id: UserId,
        timestamp: u64,
    },

    PowerupCollected {
        user_id: UserId,
        powerup_id: Uuid,
        powerup_type: PowerupType,
    },

    MineExploded { mine_id: Uuid, victim_id: UserId },

    GameOver {
        winner_id: UserId,
        results: Vec<PlayerResult>,
        timestamp: u64,
    },

    ReturnToWaiting {
        lobby_id: String,
        player_models: HashMap<UserId, Option<String>>,
        timestamp: u64,
    },

    VoicePeerList {
        room_id: String,
        peers: Vec<VoicePeer>,
        ice_servers: serde_json::Value,
    },

    VoicePeerJoined { room_id: String, user_id: UserId },

    VoicePeerLeft { room_id: String, user_id: UserId },

    VoiceSignal {
        room_id: String,
        from_user_id: UserId,
        data: serde_json::Value,
    },

    /// Protocol-level failure; the connection stays open
    Error { message: String },
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMsg::Error {
            message: message.into(),
        }
    }
}

/// Player fields visible to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub user_id: UserId,
    pub username: String,
    pub position: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    pub health: u32,
    pub kills: u32,
    pub deaths: u32,
    pub held_powerup: Option<HeldPowerup>,
}

/// Contents of a `game_state` frame
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub players: BTreeMap<UserId, PlayerSnapshot>,
    pub bullets: Vec<Projectile>,
    pub walls: Vec<Wall>,
    pub powerups: Vec<Pickup>,
    pub mines: Vec<Hazard>,
    pub beams: Vec<ActiveBeam>,
    pub portals: Vec<Portal>,
}

/// Final standing of one player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub user_id: UserId,
    pub username: String,
    pub kills: u32,
    pub deaths: u32,
    pub placement: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoicePeer {
    pub user_id: UserId,
    /// True when the receiver should create the offer
    pub initiator_hint: bool,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Binary frames are not supported")]
    Binary,
}

impl ProtocolError {
    /// Text sent back to the client; parser details stay in the logs
    pub fn client_message(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "Invalid message format",
            ProtocolError::Binary => "Binary frames are not supported",
        }
    }
}

/// Decode one inbound text frame
pub fn decode_client_msg(text: &str) -> Result<ClientMsg, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
