use crate::base::counters::Counters;
use crate::base::neterror::NetError;

#[test]
fn test_net_error_roundtrip() {
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    // Custom error
    let custom = NetError::PoolClosed;
    let custom_code = custom.as_i32();
    assert_eq!(custom_code, -10011);
    assert!(matches!(NetError::from(custom_code), NetError::PoolClosed));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
}

#[test]
fn test_core_errors_use_custom_range() {
    let core = [
        NetError::PoolExhausted { attempts: 3, last: Box::new(NetError::ConnectionRefused) },
        NetError::PoolClosed,
        NetError::NegotiationFailed { protocol: Some("spdy/3".into()) },
        NetError::WriteFailed,
        NetError::SubscriptionAlreadyAttached,
        NetError::IllegalStateTransition { state: "Running", event: "attach" },
    ];
    for err in core {
        assert!(err.as_i32() <= -10000, "{err} should use a custom code");
    }
}

#[test]
fn test_negotiation_failed_display() {
    let err = NetError::NegotiationFailed { protocol: Some("spdy/3".into()) };
    assert_eq!(err.to_string(), "Protocol negotiation failed: spdy/3");
    let err = NetError::NegotiationFailed { protocol: None };
    assert_eq!(err.to_string(), "Protocol negotiation failed: no protocol selected");
}

#[test]
fn test_pool_exhausted_keeps_last_cause() {
    use std::error::Error;

    let err = NetError::PoolExhausted {
        attempts: 2,
        last: Box::new(NetError::NegotiationFailed { protocol: None }),
    };
    assert_eq!(
        err.to_string(),
        "Pool exhausted after 2 connection attempts: Protocol negotiation failed: no protocol selected"
    );
    let source = err.source().and_then(|s| s.downcast_ref::<NetError>());
    assert!(matches!(source, Some(NetError::NegotiationFailed { protocol: None })));
}

#[test]
fn test_counters_pending() {
    let counters = Counters::new();
    counters.record_request();
    counters.record_request();
    counters.record_response();
    assert_eq!(counters.requests(), 2);
    assert_eq!(counters.responses(), 1);
    assert_eq!(counters.pending(), 1);
}
