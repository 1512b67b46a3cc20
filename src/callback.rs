use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::models::{State, ThingStatus, ThingStatusDetail};

/// The framework boundary: where channel state, device status and device
/// properties end up.
pub trait HandlerCallback: Send + Sync {
    fn state_changed(&self, channel_id: &str, state: State);

    fn status_changed(&self, status: ThingStatus, detail: ThingStatusDetail, message: Option<&str>);

    fn set_property(&self, name: &str, value: &str);
}

/// Read access to last-published channel state.
pub trait StateLookup {
    fn get_state(&self, channel_id: &str) -> Option<State>;
}

impl StateLookup for HashMap<String, State> {
    fn get_state(&self, channel_id: &str) -> Option<State> {
        self.get(channel_id).cloned()
    }
}

/// A [`HandlerCallback`] that remembers the last state of every channel and
/// only forwards state that actually changed. Status changes and properties
/// always pass through.
pub struct StatefulHandlerCallback {
    wrapped: Arc<dyn HandlerCallback>,
    states: Mutex<HashMap<String, State>>,
}

impl StatefulHandlerCallback {
    pub fn new(wrapped: Arc<dyn HandlerCallback>) -> Self {
        Self {
            wrapped,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Drops the cached state of a channel so the next update for it is
    /// forwarded even if the value did not change.
    pub fn remove_state(&self, channel_id: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel_id);
    }

    pub fn clear_states(&self) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl StateLookup for StatefulHandlerCallback {
    fn get_state(&self, channel_id: &str) -> Option<State> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel_id)
            .cloned()
    }
}

impl HandlerCallback for StatefulHandlerCallback {
    fn state_changed(&self, channel_id: &str, state: State) {
        {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            if states.get(channel_id) == Some(&state) {
                trace!(channel = channel_id, %state, "State unchanged, not forwarding");
                return;
            }
            states.insert(channel_id.to_string(), state.clone());
        }
        self.wrapped.state_changed(channel_id, state);
    }

    fn status_changed(&self, status: ThingStatus, detail: ThingStatusDetail, message: Option<&str>) {
        self.wrapped.status_changed(status, detail, message);
    }

    fn set_property(&self, name: &str, value: &str) {
        self.wrapped.set_property(name, value);
    }
}
