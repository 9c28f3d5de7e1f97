//! Durable match history: sessions, participants and lifetime player stats

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use crate::game::entities::UserId;
use crate::ws::protocol::PlayerResult;

use super::queue::{PersistJob, StatsWriter};
use super::supabase::{SupabaseClient, SupabaseError};

#[derive(Debug, Serialize)]
struct NewSession<'a> {
    id: Uuid,
    lobby_id: &'a str,
    status: &'static str,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct NewParticipant {
    session_id: Uuid,
    user_id: UserId,
}

#[derive(Debug, Serialize)]
struct SessionFinished {
    status: &'static str,
    winner_id: UserId,
    ended_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ParticipantResult {
    kills: u32,
    deaths: u32,
    placement: u32,
}

#[derive(Debug, Serialize)]
struct ParticipantCounter {
    p_session_id: Uuid,
    p_user_id: UserId,
}

#[derive(Debug, Serialize)]
struct PlayerStatsDelta {
    p_user_id: UserId,
    p_kills: u32,
    p_deaths: u32,
    p_won: bool,
}

/// Match stats store operations
#[derive(Clone)]
pub struct MatchStatsStore {
    client: SupabaseClient,
}

impl MatchStatsStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Open a session row and register its participants
    pub async fn start_session(
        &self,
        session_id: Uuid,
        lobby_id: &str,
        participants: &[UserId],
    ) -> Result<(), SupabaseError> {
        let session = NewSession {
            id: session_id,
            lobby_id,
            status: "in_progress",
            started_at: Utc::now(),
        };
        self.client.insert_ignore("game_sessions", &[session], "id").await?;

        if participants.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewParticipant> = participants
            .iter()
            .map(|user_id| NewParticipant {
                session_id,
                user_id: *user_id,
            })
            .collect();
        self.client
            .insert_ignore("game_participants", &rows, "session_id,user_id")
            .await
    }

    /// Bump the participant counters for a corroborated client kill report
    pub async fn record_kill(
        &self,
        session_id: Uuid,
        killer_id: UserId,
        victim_id: UserId,
    ) -> Result<(), SupabaseError> {
        self.client
            .rpc(
                "increment_participant_kills",
                &ParticipantCounter {
                    p_session_id: session_id,
                    p_user_id: killer_id,
                },
            )
            .await?;
        self.client
            .rpc(
                "increment_participant_deaths",
                &ParticipantCounter {
                    p_session_id: session_id,
                    p_user_id: victim_id,
                },
            )
            .await
    }

    /// Close the session, store final standings and fold them into lifetime stats
    pub async fn finish_session(
        &self,
        session_id: Uuid,
        winner_id: UserId,
        results: &[PlayerResult],
    ) -> Result<(), SupabaseError> {
        let query = format!("id=eq.{}", session_id);
        self.client
            .update(
                "game_sessions",
                &query,
                &SessionFinished {
                    status: "finished",
                    winner_id,
                    ended_at: Utc::now(),
                },
            )
            .await?;

        for result in results {
            let query = format!("session_id=eq.{}&user_id=eq.{}", session_id, result.user_id);
            self.client
                .update(
                    "game_participants",
                    &query,
                    &ParticipantResult {
                        kills: result.kills,
                        deaths: result.deaths,
                        placement: result.placement,
                    },
                )
                .await?;

            self.client
                .rpc(
                    "record_player_result",
                    &PlayerStatsDelta {
                        p_user_id: result.user_id,
                        p_kills: result.kills,
                        p_deaths: result.deaths,
                        p_won: result.user_id == winner_id,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

impl StatsWriter for MatchStatsStore {
    fn write<'a>(&'a self, job: &'a PersistJob) -> BoxFuture<'a, Result<(), SupabaseError>> {
        async move {
            match job {
                PersistJob::StartSession {
                    session_id,
                    lobby_id,
                    participants,
                } => self.start_session(*session_id, lobby_id, participants).await,
                PersistJob::RecordKill {
                    session_id,
                    killer_id,
                    victim_id,
                } => self.record_kill(*session_id, *killer_id, *victim_id).await,
                PersistJob::FinishSession {
                    session_id,
                    winner_id,
                    results,
                    ..
                } => self.finish_session(*session_id, *winner_id, results).await,
            }
        }
        .boxed()
    }
}
