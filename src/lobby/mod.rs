//! Live sockets and the game-protocol handlers that sit on top of them

pub mod fabric;
pub mod service;

pub use fabric::{ConnectionFabric, ConnectionId};
pub use service::{LobbyService, SessionContext};
