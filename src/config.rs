use std::env;
use std::time::Duration;

use crate::entity::CollectionKind;

const DEFAULT_BASE_URL: &str = "http://localhost:8010";
const DEFAULT_OPERATOR: &str = "crcon_terminal";

/// Runtime settings read once at startup and handed to whoever needs them.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: Option<String>,
    pub operator: String,
    pub demo: bool,
    pub live_poll: Duration,
    pub history_poll: Duration,
    pub lists_poll: Duration,
    pub action_inflight_max: usize,
    pub request_timeout: Duration,
    pub history_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            operator: DEFAULT_OPERATOR.to_string(),
            demo: false,
            live_poll: Duration::from_secs(5),
            history_poll: Duration::from_secs(60),
            lists_poll: Duration::from_secs(60),
            action_inflight_max: 8,
            request_timeout: Duration::from_secs(10),
            history_page_size: 50,
        }
    }
}

impl Config {
    /// Loads `.env.local` and `.env` (first one wins per key), then reads the process env.
    pub fn load() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let base_url = opt_env("CRCON_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key: opt_env("CRCON_API_KEY"),
            operator: opt_env("CRCON_OPERATOR").unwrap_or_else(|| DEFAULT_OPERATOR.to_string()),
            demo: opt_env("CRCON_DEMO").is_some_and(|val| parse_flag(&val)),
            live_poll: Duration::from_secs(env_u64("LIVE_POLL_SECS", 5).max(2)),
            history_poll: Duration::from_secs(env_u64("HISTORY_POLL_SECS", 60).max(10)),
            lists_poll: Duration::from_secs(env_u64("LISTS_POLL_SECS", 60).max(10)),
            action_inflight_max: env_u64("ACTION_INFLIGHT_MAX", 8).clamp(1, 64) as usize,
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 10).clamp(1, 120)),
            history_page_size: env_u64("HISTORY_PAGE_SIZE", 50).clamp(10, 500) as u32,
        }
    }

    pub fn poll_interval(&self, kind: CollectionKind) -> Duration {
        match kind {
            CollectionKind::Live => self.live_poll,
            CollectionKind::History => self.history_poll,
            CollectionKind::Vip | CollectionKind::Blacklist => self.lists_poll,
        }
    }

    pub fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    opt_env(key)
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
