use std::fmt;

/// Last known value of a channel, as published to the framework.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    OnOff(bool),
    Decimal(f64),
    Text(String),
}

impl State {
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            State::Decimal(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::OnOff(true) => write!(f, "ON"),
            State::OnOff(false) => write!(f, "OFF"),
            State::Decimal(value) => write!(f, "{}", value),
            State::Text(text) => write!(f, "{}", text),
        }
    }
}

/// A command sent to a channel from outside.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OnOff(bool),
    Decimal(f64),
    Text(String),
    /// Re-query the channel, forcing the next value through the cache.
    Refresh,
}

impl Command {
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::OnOff(_) => "boolean",
            Command::Decimal(_) => "numeric",
            Command::Text(_) => "string",
            Command::Refresh => "refresh",
        }
    }
}

impl From<bool> for Command {
    fn from(on: bool) -> Self {
        Command::OnOff(on)
    }
}

impl From<f64> for Command {
    fn from(value: f64) -> Self {
        Command::Decimal(value)
    }
}

impl From<i32> for Command {
    fn from(value: i32) -> Self {
        Command::Decimal(f64::from(value))
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::Text(text.to_string())
    }
}

/// Framework-visible health of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThingStatus {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThingStatusDetail {
    None,
    ConfigurationError,
    CommunicationError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub status: ThingStatus,
    pub detail: ThingStatusDetail,
    pub message: Option<String>,
}

impl StatusInfo {
    pub fn online() -> Self {
        Self {
            status: ThingStatus::Online,
            detail: ThingStatusDetail::None,
            message: None,
        }
    }

    pub fn offline(detail: ThingStatusDetail, message: &str) -> Self {
        Self {
            status: ThingStatus::Offline,
            detail,
            message: Some(message.to_string()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ThingStatus::Online
    }
}

impl Default for StatusInfo {
    fn default() -> Self {
        Self {
            status: ThingStatus::Unknown,
            detail: ThingStatusDetail::None,
            message: None,
        }
    }
}
