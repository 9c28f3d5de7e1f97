//! Inbound game-protocol dispatch
//!
//! Socket handlers hand every decoded frame to [`LobbyService::handle_message`].
//! Gameplay frames only touch the per-lobby input buffer; join, leave and
//! lifecycle frames take the match lock briefly and never across an await.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::combat::KillReportVerdict;
use crate::game::entities::{Player, Vec2};
use crate::game::snapshot::SnapshotBuilder;
use crate::game::{AbilityUse, LobbyId, MatchRegistry, ShotRequest, UserId};
use crate::store::{LobbyDirectory, LobbyInfo, PersistJob, PersistenceQueue};
use crate::util::time::unix_millis;
use crate::voice::VoiceRooms;
use crate::ws::protocol::{ClientMsg, InputPayload, ServerMsg};

use super::fabric::{ConnectionFabric, ConnectionId};

/// What one socket is bound to
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub conn_id: ConnectionId,
    pub user_id: Option<UserId>,
    pub lobby_id: Option<LobbyId>,
}

impl SessionContext {
    pub fn new(conn_id: ConnectionId) -> Self {
        Self {
            conn_id,
            user_id: None,
            lobby_id: None,
        }
    }
}

pub struct LobbyService {
    registry: Arc<MatchRegistry>,
    fabric: Arc<ConnectionFabric>,
    directory: Arc<dyn LobbyDirectory>,
    persistence: PersistenceQueue,
    voice: Arc<VoiceRooms>,
}

impl LobbyService {
    pub fn new(
        registry: Arc<MatchRegistry>,
        fabric: Arc<ConnectionFabric>,
        directory: Arc<dyn LobbyDirectory>,
        persistence: PersistenceQueue,
        voice: Arc<VoiceRooms>,
    ) -> Self {
        Self {
            registry,
            fabric,
            directory,
            persistence,
            voice,
        }
    }

    pub async fn handle_message(&self, ctx: &mut SessionContext, msg: ClientMsg) {
        self.handle_at(ctx, msg, unix_millis()).await;
    }

    pub(crate) async fn handle_at(&self, ctx: &mut SessionContext, msg: ClientMsg, now: u64) {
        if !self.authorize(ctx, &msg) {
            return;
        }

        match msg {
            ClientMsg::JoinGame {
                lobby_id,
                user_id,
                username,
            } => self.join_game(ctx, lobby_id, user_id, username, now).await,
            ClientMsg::PlayerInput { user_id, input } => self.buffer_input(ctx, user_id, input),
            ClientMsg::PickupPowerup { user_id, powerup_id } => {
                self.buffer_pickup(ctx, user_id, powerup_id)
            }
            ClientMsg::UsePowerup { user_id, data } => {
                if let Some(handle) = self.current_match(ctx) {
                    handle.with_input(user_id, |input| {
                        input.ability_uses.push(AbilityUse {
                            expected: data.powerup_type,
                        })
                    });
                }
            }
            ClientMsg::Kill {
                killer_id,
                victim_id,
                session_id,
            } => self.kill_report(ctx, killer_id, victim_id, session_id, now),
            ClientMsg::StartGame { lobby_id } => self.start_game(ctx, &lobby_id, now),
            ClientMsg::HostReturnToWaiting { lobby_id } => {
                self.return_to_waiting(ctx, &lobby_id, now).await
            }
            ClientMsg::JoinedVoice { room_id, user_id } => self.voice.join(&room_id, user_id, now),
            ClientMsg::LeaveVoice { room_id, user_id } => {
                self.voice.leave(&room_id, user_id);
            }
            ClientMsg::VoiceSignal {
                room_id,
                from_user_id,
                to_user_id,
                data,
            } => {
                if !self.voice.signal(&room_id, from_user_id, to_user_id, data, now) {
                    debug!(room_id = %room_id, from = %from_user_id, to = %to_user_id, "Voice signal not relayed");
                }
            }
            ClientMsg::RequestVoicePeers { room_id, user_id } => {
                self.voice.request_peers(&room_id, user_id, now)
            }
            ClientMsg::PlaySound { sound, position } => self.relay_sound(ctx, sound, position),
            ClientMsg::PlayerTeleported { user_id } => {
                debug!(user_id = %user_id, "Client teleport notice ignored");
            }
            ClientMsg::EndGame { lobby_id } => {
                debug!(lobby_id = %lobby_id, "Client-reported results ignored");
            }
        }
    }

    /// Bind identity on the first join and drop frames that act for someone else
    fn authorize(&self, ctx: &mut SessionContext, msg: &ClientMsg) -> bool {
        let acting = msg.acting_user();
        match (ctx.user_id, acting) {
            (Some(bound), Some(acting)) if bound != acting => {
                warn!(conn_id = %ctx.conn_id, bound = %bound, acting = %acting, "Frame names another user, dropping");
                false
            }
            (Some(_), _) => true,
            (None, Some(acting))
                if matches!(msg, ClientMsg::JoinGame { .. } | ClientMsg::JoinedVoice { .. }) =>
            {
                if !self.fabric.bind_user(ctx.conn_id, acting) {
                    return false;
                }
                ctx.user_id = Some(acting);
                true
            }
            (None, _) => {
                debug!(conn_id = %ctx.conn_id, "Frame before join, dropping");
                false
            }
        }
    }

    fn current_match(&self, ctx: &SessionContext) -> Option<crate::game::MatchHandle> {
        ctx.lobby_id.as_deref().and_then(|id| self.registry.get(id))
    }

    async fn lookup_lobby(&self, lobby_id: &str) -> Option<LobbyInfo> {
        match self.directory.get_lobby(lobby_id).await {
            Ok(lobby) => lobby,
            Err(e) => {
                warn!(lobby_id = %lobby_id, error = %e, "Lobby directory lookup failed");
                None
            }
        }
    }

    async fn join_game(
        &self,
        ctx: &mut SessionContext,
        lobby_id: LobbyId,
        user_id: UserId,
        username: Option<String>,
        now: u64,
    ) {
        let lobby = self.lookup_lobby(&lobby_id).await;

        if let Some(previous) = ctx.lobby_id.take().filter(|p| *p != lobby_id) {
            self.leave_match(&previous, user_id);
        }

        let username = username
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("Player_{}", &user_id.to_string()[..8]));

        let handle = self.registry.get_or_create(&lobby_id);
        let (added, players, walls, portals, state) = handle.update(|m| {
            let slot = lobby
                .as_ref()
                .and_then(|l| l.slot_of(user_id))
                .unwrap_or(m.players.len());
            let added = m.add_player(Player::new(user_id, username.clone(), slot));
            let players = m.players.values().map(Player::snapshot).collect::<Vec<_>>();
            (
                added,
                players,
                m.walls.clone(),
                m.portals.clone(),
                SnapshotBuilder::build(m, now),
            )
        });

        self.fabric.join_lobby(ctx.conn_id, &lobby_id);
        ctx.lobby_id = Some(lobby_id.clone());

        info!(lobby_id = %lobby_id, user_id = %user_id, rejoin = !added, "Player joined match");

        self.fabric.send_to_connection(
            ctx.conn_id,
            &ServerMsg::Joined {
                lobby_id: lobby_id.clone(),
                user_id,
                players,
                walls,
                portals,
            },
        );
        if let Some(lobby) = lobby.filter(LobbyInfo::has_model_selections) {
            self.fabric.send_to_connection(
                ctx.conn_id,
                &ServerMsg::PlayerModelState {
                    lobby_id: lobby_id.clone(),
                    player_models: lobby.player_models,
                },
            );
        }
        if added {
            self.fabric.broadcast_except(
                &lobby_id,
                &ServerMsg::PlayerJoined { user_id, username },
                Some(ctx.conn_id),
            );
        }
        self.fabric.broadcast_except(&lobby_id, &state, None);
    }

    fn buffer_input(&self, ctx: &SessionContext, user_id: UserId, input: InputPayload) {
        let Some(handle) = self.current_match(ctx) else {
            return;
        };
        let shot = input.shoot.and_then(|s| {
            Some(ShotRequest {
                position: s.position?,
                rotation: s.rotation?,
            })
        });
        handle.with_input(user_id, |buffered| {
            if let Some(rotation) = input.rotation {
                buffered.steer = Some(rotation);
            }
            if let Some(shot) = shot {
                buffered.shots.push(shot);
            }
        });
    }

    /// Pass a sound cue to everyone else in the lobby
    fn relay_sound(&self, ctx: &SessionContext, sound: Option<String>, position: Option<Vec2>) {
        let (Some(lobby_id), Some(sound)) = (ctx.lobby_id.as_deref(), sound) else {
            return;
        };
        if sound.is_empty() {
            return;
        }
        self.fabric
            .broadcast_except(lobby_id, &ServerMsg::PlaySound { sound, position }, Some(ctx.conn_id));
    }

    fn buffer_pickup(&self, ctx: &SessionContext, user_id: UserId, powerup_id: Uuid) {
        if let Some(handle) = self.current_match(ctx) {
            handle.with_input(user_id, |input| input.pickups.push(powerup_id));
        }
    }

    /// Advisory client kill report; only feeds durable counters
    fn kill_report(
        &self,
        ctx: &SessionContext,
        killer_id: UserId,
        victim_id: UserId,
        session_id: Option<Uuid>,
        now: u64,
    ) {
        let Some(reporter) = ctx.user_id else {
            return;
        };
        if reporter != killer_id && reporter != victim_id {
            debug!(reporter = %reporter, "Kill report from a bystander, ignoring");
            return;
        }
        let Some(handle) = self.current_match(ctx) else {
            return;
        };

        let (verdict, match_session) =
            handle.update(|m| (m.verify_kill_report(killer_id, victim_id, now), m.session_id));

        if verdict == KillReportVerdict::Rejected {
            return;
        }
        let Some(session_id) = session_id.or(match_session) else {
            return;
        };
        self.persistence.enqueue(PersistJob::RecordKill {
            session_id,
            killer_id,
            victim_id,
        });
    }

    fn start_game(&self, ctx: &SessionContext, lobby_id: &str, now: u64) {
        let Some(user_id) = ctx.user_id else {
            return;
        };
        let Some(handle) = self.registry.get(lobby_id) else {
            return;
        };

        let started = handle.update(|m| {
            if !m.players.contains_key(&user_id) {
                return None;
            }
            m.start(now)
                .map(|session_id| (session_id, m.players.keys().copied().collect::<Vec<_>>()))
        });
        let Some((session_id, participants)) = started else {
            debug!(lobby_id = %lobby_id, user_id = %user_id, "Start request ignored");
            return;
        };

        self.fabric.broadcast_except(
            lobby_id,
            &ServerMsg::GameStarted {
                lobby_id: lobby_id.to_string(),
                timestamp: now,
            },
            None,
        );
        self.persistence.enqueue(PersistJob::StartSession {
            session_id,
            lobby_id: lobby_id.to_string(),
            participants,
        });
    }

    /// Host-only: tear the match down and send everyone back to the lobby
    async fn return_to_waiting(&self, ctx: &SessionContext, lobby_id: &str, now: u64) {
        let Some(user_id) = ctx.user_id else {
            return;
        };
        let Some(lobby) = self.lookup_lobby(lobby_id).await else {
            return;
        };
        if !lobby.is_host(user_id) {
            debug!(lobby_id = %lobby_id, user_id = %user_id, "Return to waiting from non-host, ignoring");
            return;
        }

        self.fabric.broadcast_except(
            lobby_id,
            &ServerMsg::ReturnToWaiting {
                lobby_id: lobby_id.to_string(),
                player_models: lobby.player_models,
                timestamp: now,
            },
            None,
        );
        if self.registry.remove(lobby_id).is_some() {
            info!(lobby_id = %lobby_id, "Match destroyed, lobby back to waiting");
        }
    }

    fn leave_match(&self, lobby_id: &str, user_id: UserId) {
        let Some(handle) = self.registry.get(lobby_id) else {
            return;
        };
        let (removed, remaining) = handle.update(|m| (m.remove_player(user_id).is_some(), m.players.len()));
        handle.take_input(user_id);
        if !removed {
            return;
        }

        info!(lobby_id = %lobby_id, user_id = %user_id, "Player left match");
        self.fabric
            .broadcast_except(lobby_id, &ServerMsg::PlayerLeft { user_id }, None);

        if remaining == 0 && self.fabric.lobby_connection_count(lobby_id) == 0 {
            self.registry.remove(lobby_id);
            info!(lobby_id = %lobby_id, "Last player gone, match destroyed");
        }
    }

    /// Socket closed: detach from fabric, match and voice rooms
    pub fn disconnect(&self, ctx: &SessionContext) {
        if self.fabric.remove(ctx.conn_id).is_none() {
            return;
        }
        let Some(user_id) = ctx.user_id else {
            return;
        };
        if let Some(lobby_id) = &ctx.lobby_id {
            self.leave_match(lobby_id, user_id);
        }
        self.voice.leave_all(user_id);
    }
}
