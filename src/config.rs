use std::env;
use std::time::Duration;

use crate::error::Error;
use crate::routing::CameraPadding;

const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECTION_GRACE_SECS: u64 = 15;
const DEFAULT_ARRIVAL_RADIUS_METERS: f64 = 50.0;

#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub session_url: String,
    pub auth_token: String,
    pub search_timeout: Duration,
    pub connection_grace: Duration,
    pub reconnect: ReconnectPolicy,
    pub arrival_radius_meters: f64,
    pub camera_padding: CameraPadding,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let session_url = env::var("HANSOM_SESSION_URL")?;
        let auth_token = env::var("HANSOM_AUTH_TOKEN")?;

        let search_timeout =
            Duration::from_secs(env_u64("HANSOM_SEARCH_TIMEOUT_SECS", DEFAULT_SEARCH_TIMEOUT_SECS));
        let connection_grace = Duration::from_secs(env_u64(
            "HANSOM_CONNECTION_GRACE_SECS",
            DEFAULT_CONNECTION_GRACE_SECS,
        ));
        let arrival_radius_meters =
            env_f64("HANSOM_ARRIVAL_RADIUS_METERS", DEFAULT_ARRIVAL_RADIUS_METERS);

        Ok(Self {
            session_url,
            auth_token,
            search_timeout,
            connection_grace,
            reconnect: ReconnectPolicy::default(),
            arrival_radius_meters,
            camera_padding: CameraPadding::default(),
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
