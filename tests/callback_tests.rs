mod common;

use std::sync::Arc;

use atlona_opus_rs::{
    EventCallback, HandlerCallback, OpusEvent, State, StateLookup, StatefulHandlerCallback,
    ThingStatus, ThingStatusDetail,
};
use common::RecordingCallback;

// Test identical state is forwarded once
#[test]
fn test_publish_deduplicates() {
    let recorder = RecordingCallback::new();
    let callback = StatefulHandlerCallback::new(recorder.clone());

    callback.state_changed("primary::power", State::OnOff(true));
    callback.state_changed("primary::power", State::OnOff(true));
    callback.state_changed("primary::power", State::OnOff(false));
    callback.state_changed("port1::portoutput", State::Decimal(2.0));

    assert_eq!(
        recorder.states_for("primary::power"),
        vec![State::OnOff(true), State::OnOff(false)]
    );
    assert_eq!(
        callback.get_state("port1::portoutput"),
        Some(State::Decimal(2.0))
    );
}

// Test invalidating a channel forces the next identical value through
#[test]
fn test_invalidate_forces_notification() {
    let recorder = RecordingCallback::new();
    let callback = StatefulHandlerCallback::new(recorder.clone());

    callback.state_changed("volume1::volume", State::Decimal(-10.0));
    callback.state_changed("volume1::volume", State::Decimal(-10.0));
    assert_eq!(recorder.states_for("volume1::volume").len(), 1);

    callback.remove_state("volume1::volume");
    assert_eq!(callback.get_state("volume1::volume"), None);
    callback.state_changed("volume1::volume", State::Decimal(-10.0));
    assert_eq!(recorder.states_for("volume1::volume").len(), 2);

    callback.clear_states();
    callback.state_changed("volume1::volume", State::Decimal(-10.0));
    assert_eq!(recorder.states_for("volume1::volume").len(), 3);
}

// Test status and properties are never deduplicated
#[test]
fn test_status_and_properties_pass_through() {
    let recorder = RecordingCallback::new();
    let callback = StatefulHandlerCallback::new(recorder.clone());

    for _ in 0..2 {
        callback.status_changed(
            ThingStatus::Offline,
            ThingStatusDetail::CommunicationError,
            Some("gone"),
        );
        callback.set_property("version", "V1.6.3");
    }

    assert_eq!(recorder.statuses.lock().unwrap().len(), 2);
    assert_eq!(recorder.properties.lock().unwrap().len(), 2);
}

// Test the broadcast callback turns calls into events
#[tokio::test]
async fn test_event_callback_broadcasts() {
    let events = EventCallback::with_capacity(16);
    let mut first = events.subscribe();
    let mut second = events.subscribe();
    let callback = StatefulHandlerCallback::new(Arc::new(events.clone()));

    callback.state_changed("primary::irenable", State::OnOff(true));
    callback.state_changed("primary::irenable", State::OnOff(true));
    callback.status_changed(ThingStatus::Online, ThingStatusDetail::None, None);
    callback.set_property("type", "AT-OPUS-810M");

    let expected = vec![
        OpusEvent::StateChanged {
            channel_id: "primary::irenable".to_string(),
            state: State::OnOff(true),
        },
        OpusEvent::StatusChanged {
            status: ThingStatus::Online,
            detail: ThingStatusDetail::None,
            message: None,
        },
        OpusEvent::PropertyChanged {
            name: "type".to_string(),
            value: "AT-OPUS-810M".to_string(),
        },
    ];

    for event in &expected {
        assert_eq!(&first.recv().await.unwrap(), event);
        assert_eq!(&second.recv().await.unwrap(), event);
    }
    assert!(first.try_recv().is_err());
    assert_eq!(
        expected.iter().map(OpusEvent::event_type).collect::<Vec<_>>(),
        vec!["stateChanged", "statusChanged", "propertyChanged"]
    );
}

// Test sending without subscribers is harmless
#[test]
fn test_event_callback_without_subscribers() {
    let events = EventCallback::default();
    events.state_changed("primary::power", State::OnOff(true));
    events.set_property("version", "V1");
}
