use crate::base::neterror::NetError;

#[test]
fn test_net_error_roundtrip() {
    // Standard Chromium error
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    // DNS range
    let dns = NetError::DnsTimedOut;
    assert_eq!(dns.as_i32(), -803);
    assert!(matches!(NetError::from(-803), NetError::DnsTimedOut));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
    assert_eq!(err.as_i32(), -9999);
}

#[test]
fn test_dns_error_range() {
    assert!(NetError::DnsServerFailed.is_dns_error());
    assert!(NetError::DnsSecureResolverHostnameResolutionFailed.is_dns_error());
    assert!(!NetError::NameNotResolved.is_dns_error());
    assert!(!NetError::InsufficientResources.is_dns_error());
}
