use serde::Deserialize;
use std::time::Duration;

use crate::OpusError;

pub const DEFAULT_PORT: u16 = 23;
const DEFAULT_POLLING_SECS: u64 = 600;
const DEFAULT_PING_SECS: u64 = 30;
const DEFAULT_RETRY_SECS: u64 = 10;

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_polling() -> u64 {
    DEFAULT_POLLING_SECS
}
fn default_ping() -> u64 {
    DEFAULT_PING_SECS
}
fn default_retry_polling() -> u64 {
    DEFAULT_RETRY_SECS
}

/// Per-device configuration for an OPUS switch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpusConfig {
    #[serde(alias = "hostname", default)]
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Seconds between full state refreshes.
    #[serde(default = "default_polling")]
    pub polling: u64,
    /// Seconds between keepalive pings.
    #[serde(default = "default_ping")]
    pub ping: u64,
    /// Seconds before a reconnect attempt.
    #[serde(default = "default_retry_polling")]
    pub retry_polling: u64,
    /// Upper bound for the doubled retry delay; `None` keeps it fixed.
    #[serde(default)]
    pub max_retry_polling: Option<u64>,
}

impl OpusConfig {
    pub fn new(ip_address: &str) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            port: DEFAULT_PORT,
            user_name: None,
            password: None,
            polling: DEFAULT_POLLING_SECS,
            ping: DEFAULT_PING_SECS,
            retry_polling: DEFAULT_RETRY_SECS,
            max_retry_polling: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, OpusError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user_name: &str, password: &str) -> Self {
        self.user_name = Some(user_name.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_intervals(mut self, polling: u64, ping: u64, retry_polling: u64) -> Self {
        self.polling = polling;
        self.ping = ping;
        self.retry_polling = retry_polling;
        self
    }

    pub fn with_max_retry_polling(mut self, max_retry_polling: u64) -> Self {
        self.max_retry_polling = Some(max_retry_polling);
        self
    }

    /// Checks everything the handler needs before any I/O is attempted.
    pub fn validate(&self) -> Result<(), OpusError> {
        if self.ip_address.trim().is_empty() {
            return Err(OpusError::Config(
                "IP Address of Atlona Opus is missing from configuration".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(OpusError::Config("port must be greater than 0".to_string()));
        }
        for (name, secs) in [
            ("polling", self.polling),
            ("ping", self.ping),
            ("retryPolling", self.retry_polling),
        ] {
            if secs == 0 {
                return Err(OpusError::Config(format!(
                    "{} interval must be greater than 0",
                    name
                )));
            }
        }
        if let Some(max) = self.max_retry_polling {
            if max < self.retry_polling {
                return Err(OpusError::Config(
                    "maxRetryPolling must not be less than retryPolling".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        self.ip_address.trim()
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_polling)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_secs(self.max_retry_polling.unwrap_or(self.retry_polling))
    }

    /// True when a user name is configured for the telnet login.
    pub fn has_credentials(&self) -> bool {
        self.user_name
            .as_deref()
            .map(|u| !u.trim().is_empty())
            .unwrap_or(false)
    }
}
