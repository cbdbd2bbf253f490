use crate::base::neterror::{ErrorKind, NetError};

#[test]
fn test_net_error_roundtrip() {
    // Standard Chromium error
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    // Engine-specific error
    let custom = NetError::PoolClosed;
    let custom_code = custom.as_i32();
    assert_eq!(custom_code, -10004);
    assert!(matches!(NetError::from(custom_code), NetError::PoolClosed));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
}

#[test]
fn test_collision_avoidance() {
    // Engine codes must stay clear of the Blob range (-900 to -906).
    let blob_range = -906..=-900;
    for err in [
        NetError::PoolClosed,
        NetError::SocketRemoteClosed,
        NetError::InvalidHeader,
        NetError::JsonParseError,
    ] {
        assert!(!blob_range.contains(&err.as_i32()));
    }
}

#[test]
fn test_taxonomy() {
    assert_eq!(NetError::NameNotResolved.kind(), ErrorKind::Resolution);
    assert_eq!(
        NetError::NameResolutionTimedOut { domain: "a.test".into() }.kind(),
        ErrorKind::Resolution
    );
    assert_eq!(
        NetError::PoolExhausted { endpoint: "http://a.test:80".into() }.kind(),
        ErrorKind::PoolExhausted
    );
    assert_eq!(NetError::InvalidChunkedEncoding.kind(), ErrorKind::Protocol);
    assert_eq!(NetError::WsProtocolError("rsv".into()).kind(), ErrorKind::Protocol);
    assert_eq!(NetError::TimedOut.kind(), ErrorKind::Timeout);
    assert_eq!(NetError::ConnectionRefused.kind(), ErrorKind::Connect);
    assert_eq!(NetError::TooManyRedirects.kind(), ErrorKind::TooManyRedirects);
    assert_eq!(NetError::Aborted.kind(), ErrorKind::Aborted);
}

#[test]
fn test_equality_ignores_context() {
    let a = NetError::PoolExhausted { endpoint: "x".into() };
    let b = NetError::PoolExhausted { endpoint: "y".into() };
    assert_eq!(a, b);
    assert_ne!(NetError::TimedOut, NetError::Aborted);
}

#[test]
fn test_from_io() {
    use std::io::{Error, ErrorKind as IoKind};
    assert_eq!(
        NetError::from_io(&Error::new(IoKind::ConnectionReset, "rst")),
        NetError::ConnectionReset
    );
    assert_eq!(
        NetError::from_io(&Error::new(IoKind::UnexpectedEof, "eof")),
        NetError::ConnectionClosed
    );
}
