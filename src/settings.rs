use once_cell::sync::Lazy;
use std::{env, time::Duration};

/// Holds all process-wide tunables, read-once from ENV with fallbacks.
pub struct Settings {
    pub initial_connect_delay: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub listener_capacity: usize,
    pub event_capacity: usize,
    pub max_frame_len: usize,
}

impl Settings {
    fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        fn parse_usize(var: &str, default: usize) -> usize {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        }

        fn parse_secs(var: &str, default_secs: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default_secs))
        }

        fn parse_millis(var: &str, default_ms: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_millis(default_ms))
        }

        Settings {
            initial_connect_delay: parse_millis("OPUS_INITIAL_CONNECT_DELAY_MS", 1_000),
            connect_timeout: parse_secs("OPUS_CONNECT_TIMEOUT_SECS", 10),
            response_timeout: parse_millis("OPUS_RESPONSE_TIMEOUT_MS", 5_000),
            listener_capacity: parse_usize("OPUS_LISTENER_CAPACITY", 256),
            event_capacity: parse_usize("OPUS_EVENT_CAPACITY", 100),
            max_frame_len: parse_usize("OPUS_MAX_FRAME_LEN", 4 * 1024),
        }
    }
}

/// Global settings instance
pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);
