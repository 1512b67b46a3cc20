use std::error::Error;
use std::io;

use atlona_opus_rs::{OpusCapabilities, OpusConfig, OpusError, RoutingError};

// Test OpusError display implementation
#[test]
fn test_opus_error_display() {
    let err = OpusError::Io(io::Error::new(io::ErrorKind::Other, "Test IO error"));
    assert!(format!("{}", err).contains("I/O error"));

    let err = OpusError::Config("IP Address of Atlona Opus is missing from configuration".into());
    assert_eq!(
        format!("{}", err),
        "Configuration error: IP Address of Atlona Opus is missing from configuration"
    );

    let err = OpusError::OutOfRange {
        what: "preset",
        value: 6,
        min: 1,
        max: 5,
    };
    assert_eq!(format!("{}", err), "preset 6 is out of range (1..=5)");

    let err = OpusError::UnsupportedPort {
        what: "hdmi port",
        port: 2,
    };
    assert_eq!(format!("{}", err), "hdmi port 2 is not supported by this model");

    assert_eq!(
        format!("{}", OpusError::NotConnected),
        "Not connected to the switch"
    );
}

// Test OpusError implements Error trait
#[test]
fn test_opus_error_trait() {
    let err = OpusError::Timeout;
    fn takes_error(_: &dyn Error) {}
    takes_error(&err);
}

// Test conversions to OpusError
#[test]
fn test_opus_error_conversions() {
    let err: OpusError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
    assert!(matches!(err, OpusError::Io(_)));
    assert!(err.is_transport());

    let err: OpusError = RoutingError::UnknownGroup("speaker1".to_string()).into();
    assert!(matches!(err, OpusError::Routing(_)));
    assert!(!err.is_transport());
    assert!(err.source().is_some());

    let err = OpusConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, OpusError::ConfigParse(_)));
}

// Test capability validation fails fast
#[test]
fn test_invalid_capabilities() {
    assert!(matches!(
        OpusCapabilities::new(0, 2, [5]),
        Err(OpusError::InvalidCapabilities(_))
    ));
    assert!(matches!(
        OpusCapabilities::new(8, 0, [5]),
        Err(OpusError::InvalidCapabilities(_))
    ));
    assert!(matches!(
        OpusCapabilities::new(8, 2, Vec::<u8>::new()),
        Err(OpusError::InvalidCapabilities(_))
    ));
    assert!(OpusCapabilities::new(8, 2, [5, 6, 7, 8]).is_ok());
}
