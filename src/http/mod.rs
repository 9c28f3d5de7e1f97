//! HTTP surface: health, match summaries and the WebSocket upgrade

pub mod routes;

pub use routes::build_router;
