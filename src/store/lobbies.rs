//! Read-only lobby membership directory

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::game::entities::UserId;

use super::supabase::{SupabaseClient, SupabaseError};

/// Lobby membership as seen by the game server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbyInfo {
    pub lobby_id: String,
    pub host_user_id: Option<UserId>,
    /// Join order; a player's index is their spawn slot
    pub players: Vec<UserId>,
    /// Cosmetic selection per player
    pub player_models: HashMap<UserId, Option<String>>,
}

impl LobbyInfo {
    pub fn slot_of(&self, user_id: UserId) -> Option<usize> {
        self.players.iter().position(|id| *id == user_id)
    }

    pub fn is_host(&self, user_id: UserId) -> bool {
        self.host_user_id == Some(user_id)
    }

    pub fn has_model_selections(&self) -> bool {
        self.player_models.values().any(Option::is_some)
    }
}

/// Lookup seam so the lobby service can run without a database
pub trait LobbyDirectory: Send + Sync {
    fn get_lobby<'a>(&'a self, lobby_id: &'a str) -> BoxFuture<'a, Result<Option<LobbyInfo>, SupabaseError>>;
}

#[derive(Debug, Deserialize)]
struct LobbyRow {
    id: String,
    host_user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct LobbyPlayerRow {
    user_id: UserId,
    player_model: Option<String>,
}

/// Lobby directory backed by the `lobbies` and `lobby_players` tables
#[derive(Clone)]
pub struct SupabaseLobbyDirectory {
    client: SupabaseClient,
}

impl SupabaseLobbyDirectory {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn fetch(&self, lobby_id: &str) -> Result<Option<LobbyInfo>, SupabaseError> {
        // Lobby ids are uuids; anything else never reaches the query string
        let Ok(lobby_id) = Uuid::parse_str(lobby_id) else {
            debug!(lobby_id = %lobby_id, "Lobby id is not a uuid, treating as unknown");
            return Ok(None);
        };

        let query = format!("id=eq.{}&select=id,host_user_id", lobby_id);
        let Some(lobby) = self.client.get_one::<LobbyRow>("lobbies", &query).await? else {
            return Ok(None);
        };

        let query = format!(
            "lobby_id=eq.{}&select=user_id,player_model&order=joined_at.asc",
            lobby_id
        );
        let rows: Vec<LobbyPlayerRow> = self.client.get("lobby_players", &query).await?;

        Ok(Some(LobbyInfo {
            lobby_id: lobby.id,
            host_user_id: lobby.host_user_id,
            players: rows.iter().map(|r| r.user_id).collect(),
            player_models: rows.into_iter().map(|r| (r.user_id, r.player_model)).collect(),
        }))
    }
}

impl LobbyDirectory for SupabaseLobbyDirectory {
    fn get_lobby<'a>(&'a self, lobby_id: &'a str) -> BoxFuture<'a, Result<Option<LobbyInfo>, SupabaseError>> {
        self.fetch(lobby_id).boxed()
    }
}
