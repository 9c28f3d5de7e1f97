//! Shared fixed-rate scheduler driving every live match

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::store::{PersistJob, PersistenceQueue};
use crate::util::time::{tick_delta, unix_millis, TICK_DURATION_MILLIS};
use crate::ws::protocol::ServerMsg;

use super::r#match::{GameOver, MatchHandle, MatchRegistry};
use super::snapshot::SnapshotBuilder;
use super::Broadcaster;

/// Frames one match produced in one tick, sent after the lock is released
struct TickFrames {
    events: Vec<ServerMsg>,
    state: Option<ServerMsg>,
    game_over: Option<(GameOver, Option<uuid::Uuid>)>,
}

pub struct Orchestrator {
    registry: Arc<MatchRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    persistence: PersistenceQueue,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<MatchRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        persistence: PersistenceQueue,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            persistence,
        }
    }

    /// Run the 20 Hz loop forever
    pub async fn run(self) {
        info!(tick_ms = TICK_DURATION_MILLIS, "Orchestrator started");

        let mut ticker = interval(Duration::from_millis(TICK_DURATION_MILLIS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.run_tick(unix_millis());
        }
    }

    /// Tick every live match once. Returns how many matches were ticked.
    pub fn run_tick(&self, now: u64) -> usize {
        let handles = self.registry.handles();
        for handle in &handles {
            let result = catch_unwind(AssertUnwindSafe(|| self.tick_match(handle, now)));
            if result.is_err() {
                // One broken match must not take the others down
                error!(lobby_id = %handle.lobby_id, "Match tick panicked, removing match");
                self.registry.remove(&handle.lobby_id);
            }
        }
        handles.len()
    }

    fn tick_match(&self, handle: &MatchHandle, now: u64) {
        let inputs = handle.take_inputs();

        let frames = handle.update(|state| {
            let outcome = state.step(inputs, now, tick_delta());
            let send_state = state.snapshots.should_send(outcome.changed);
            TickFrames {
                events: outcome.events,
                state: send_state.then(|| SnapshotBuilder::build(state, now)),
                game_over: outcome.game_over.map(|g| (g, state.session_id)),
            }
        });

        let lobby_id = handle.lobby_id.as_str();
        for event in &frames.events {
            self.broadcaster.broadcast(lobby_id, event);
        }
        if let Some(state) = &frames.state {
            self.broadcaster.broadcast(lobby_id, state);
        }
        if let Some((game_over, session_id)) = frames.game_over {
            self.broadcaster.broadcast(
                lobby_id,
                &ServerMsg::GameOver {
                    winner_id: game_over.winner_id,
                    results: game_over.results.clone(),
                    timestamp: now,
                },
            );
            if let Some(session_id) = session_id {
                self.persistence.enqueue(PersistJob::FinishSession {
                    session_id,
                    lobby_id: lobby_id.to_string(),
                    winner_id: game_over.winner_id,
                    results: game_over.results,
                });
            }
        }
    }
}
