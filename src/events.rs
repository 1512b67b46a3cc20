use tokio::sync::broadcast;

use crate::callback::HandlerCallback;
use crate::models::{State, ThingStatus, ThingStatusDetail};
use crate::settings::SETTINGS;

/// Callback traffic as seen by [`EventCallback`] subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum OpusEvent {
    StateChanged {
        channel_id: String,
        state: State,
    },
    StatusChanged {
        status: ThingStatus,
        detail: ThingStatusDetail,
        message: Option<String>,
    },
    PropertyChanged {
        name: String,
        value: String,
    },
}

impl OpusEvent {
    /// camelCase tag, handy for log fields.
    pub fn event_type(&self) -> &'static str {
        match self {
            OpusEvent::StateChanged { .. } => "stateChanged",
            OpusEvent::StatusChanged { .. } => "statusChanged",
            OpusEvent::PropertyChanged { .. } => "propertyChanged",
        }
    }
}

/// A [`HandlerCallback`] that rebroadcasts everything as [`OpusEvent`]s.
#[derive(Clone)]
pub struct EventCallback {
    sender: broadcast::Sender<OpusEvent>,
}

impl Default for EventCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCallback {
    pub fn new() -> Self {
        Self::with_capacity(SETTINGS.event_capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OpusEvent> {
        self.sender.subscribe()
    }

    // no subscribers is not an error
    fn send(&self, event: OpusEvent) {
        let _ = self.sender.send(event);
    }
}

impl HandlerCallback for EventCallback {
    fn state_changed(&self, channel_id: &str, state: State) {
        self.send(OpusEvent::StateChanged {
            channel_id: channel_id.to_string(),
            state,
        });
    }

    fn status_changed(&self, status: ThingStatus, detail: ThingStatusDetail, message: Option<&str>) {
        self.send(OpusEvent::StatusChanged {
            status,
            detail,
            message: message.map(str::to_string),
        });
    }

    fn set_property(&self, name: &str, value: &str) {
        self.send(OpusEvent::PropertyChanged {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
}
