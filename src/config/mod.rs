//! Configuration module - environment variable parsing

use serde_json::{json, Value};
use std::env;
use std::net::SocketAddr;
use tracing::warn;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Supabase project URL
    pub supabase_url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: String,

    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,
    /// ICE servers handed to voice peers
    pub ice_servers: Value,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            supabase_url: env::var("SUPABASE_URL")
                .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .map_err(|_| ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?,

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            ice_servers: parse_ice_servers(env::var("WEBRTC_ICE_SERVERS").ok().as_deref()),
        })
    }
}

fn default_ice_servers() -> Value {
    json!([{ "urls": "stun:stun.l.google.com:19302" }])
}

/// Parse the ICE server list; anything but a JSON array falls back to public STUN
fn parse_ice_servers(raw: Option<&str>) -> Value {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return default_ice_servers();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_array() => value,
        Ok(_) => {
            warn!("WEBRTC_ICE_SERVERS is not a JSON array, using default STUN server");
            default_ice_servers()
        }
        Err(e) => {
            warn!(error = %e, "Invalid WEBRTC_ICE_SERVERS, using default STUN server");
            default_ice_servers()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
impl Config {
    /// Local settings for router and state tests
    pub(crate) fn local() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_role_key: "service-role".to_string(),
            client_origin: "http://localhost:5173".to_string(),
            ice_servers: default_ice_servers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_fall_back_on_bad_input() {
        assert_eq!(parse_ice_servers(None), default_ice_servers());
        assert_eq!(parse_ice_servers(Some("{not json")), default_ice_servers());
        assert_eq!(parse_ice_servers(Some(r#"{"urls":"x"}"#)), default_ice_servers());

        let custom = parse_ice_servers(Some(r#"[{"urls":"turn:t.example","username":"u"}]"#));
        assert_eq!(custom[0]["urls"], "turn:t.example");
    }
}
