//! Data store modules for Supabase integration

pub mod lobbies;
pub mod queue;
pub mod stats;
pub mod supabase;

pub use lobbies::{LobbyDirectory, LobbyInfo, SupabaseLobbyDirectory};
pub use queue::{PersistJob, PersistenceQueue, PersistenceWorker, StatsWriter};
pub use stats::MatchStatsStore;
pub use supabase::{SupabaseClient, SupabaseError};
