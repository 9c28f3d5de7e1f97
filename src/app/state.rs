//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{MatchRegistry, Orchestrator};
use crate::lobby::{ConnectionFabric, LobbyService};
use crate::store::{
    LobbyDirectory, MatchStatsStore, PersistenceQueue, PersistenceWorker, StatsWriter,
    SupabaseClient, SupabaseLobbyDirectory,
};
use crate::voice::VoiceRooms;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<MatchRegistry>,
    pub fabric: Arc<ConnectionFabric>,
    pub voice: Arc<VoiceRooms>,
    pub service: Arc<LobbyService>,
    pub persistence: PersistenceQueue,
}

/// Long-running tasks that `main` spawns once the runtime is up
pub struct Workers<W> {
    pub persistence: PersistenceWorker<W>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Production wiring against Supabase
    pub fn new(config: Config) -> (Self, Workers<MatchStatsStore>) {
        // Initialize Supabase client
        let supabase = SupabaseClient::new(&config);

        let directory = Arc::new(SupabaseLobbyDirectory::new(supabase.clone()));
        let stats = MatchStatsStore::new(supabase);

        Self::with_backends(config, directory, stats)
    }

    /// Wire everything around the given lobby directory and stats writer
    pub fn with_backends<W: StatsWriter>(
        config: Config,
        directory: Arc<dyn LobbyDirectory>,
        stats: W,
    ) -> (Self, Workers<W>) {
        let config = Arc::new(config);

        let (persistence, worker) = PersistenceQueue::channel(stats);
        let registry = Arc::new(MatchRegistry::new());
        let fabric = Arc::new(ConnectionFabric::new());
        let voice = Arc::new(VoiceRooms::new(fabric.clone(), config.ice_servers.clone()));

        let service = Arc::new(LobbyService::new(
            registry.clone(),
            fabric.clone(),
            directory,
            persistence.clone(),
            voice.clone(),
        ));

        let orchestrator = Orchestrator::new(registry.clone(), fabric.clone(), persistence.clone());

        let state = Self {
            config,
            registry,
            fabric,
            voice,
            service,
            persistence,
        };
        let workers = Workers {
            persistence: worker,
            orchestrator,
        };
        (state, workers)
    }
}
