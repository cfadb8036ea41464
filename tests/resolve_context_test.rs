//! Resolve Context Tests
//!
//! Covers:
//! - Session binding and stale-session degradation
//! - DoH server selection by probe results and secure mode
//! - Availability change notifications
//! - Host cache invalidation across session changes

use chromenet_dns::base::networkchange::{NetworkChange, NetworkChangeNotifier};
use chromenet_dns::dns::hostcache::EntrySource;
use chromenet_dns::dns::{
    DnsConfig, DnsQueryType, DnsSession, DohServerConfig, HostCacheEntry, HostCacheKey,
    ResolveContext, SecureDnsMode, AUTOMATIC_MODE_FAILURE_LIMIT,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

fn session(num_doh_servers: usize, mode: SecureDnsMode) -> Arc<DnsSession> {
    let doh = (0..num_doh_servers)
        .map(|i| DohServerConfig::new(format!("https://doh{i}.test/dns-query"), true).unwrap())
        .collect();
    DnsSession::new(
        DnsConfig::new()
            .nameservers(vec!["10.0.0.1:53".parse().unwrap()])
            .dns_over_https_servers(doh)
            .secure_dns_mode(mode),
    )
}

fn dns_changes(rx: &mut broadcast::Receiver<NetworkChange>) -> usize {
    let mut count = 0;
    loop {
        match rx.try_recv() {
            Ok(NetworkChange::DnsChanged) => count += 1,
            Ok(NetworkChange::ConnectionTypeChanged(_)) => {}
            Err(TryRecvError::Lagged(_)) => panic!("notification channel lagged"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return count,
        }
    }
}

#[test]
fn test_automatic_then_secure_selection() {
    let ctx = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    let s = session(2, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&s));

    // No probes yet
    assert_eq!(ctx.doh_server_index_to_use(0, SecureDnsMode::Automatic, &s), None);

    ctx.set_probe_success(1, true, &s);
    assert_eq!(ctx.doh_server_index_to_use(0, SecureDnsMode::Automatic, &s), Some(1));

    // Secure mode ignores probe results
    assert_eq!(ctx.doh_server_index_to_use(0, SecureDnsMode::Secure, &s), Some(0));
}

#[test]
fn test_all_eligible_failing_falls_back_to_oldest() {
    let ctx = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    let s = session(3, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&s));
    ctx.set_probe_success(1, true, &s);
    ctx.set_probe_success(2, true, &s);

    for index in [2, 1] {
        s.record_server_failure(index, true, &ctx);
        s.record_server_failure(index, true, &ctx);
    }

    // Server 0 never probed, 2 failed first
    assert_eq!(ctx.doh_server_index_to_use(0, SecureDnsMode::Automatic, &s), Some(2));
    // Secure mode: 0 has no failures
    assert_eq!(ctx.doh_server_index_to_use(1, SecureDnsMode::Secure, &s), Some(0));
}

#[test]
fn test_cleared_failure_times_tie_to_starting_server() {
    let ctx = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    let s = session(3, SecureDnsMode::Secure);
    ctx.invalidate_caches(Some(&s));

    // DoH success clears the failure time but keeps the count at the limit
    for index in 0..3 {
        s.record_server_failure(index, true, &ctx);
        s.record_server_failure(index, true, &ctx);
        s.record_server_success(index, true);
        assert_eq!(s.last_doh_failure_count(index), 2);
        assert!(s.last_doh_failure(index).is_none());
    }

    for start in 0..3 {
        assert_eq!(
            ctx.doh_server_index_to_use(start, SecureDnsMode::Secure, &s),
            Some(start)
        );
    }
}

#[test]
fn test_notification_on_transitions_only() {
    let notifier = NetworkChangeNotifier::new();
    let mut rx = notifier.subscribe();
    let ctx = ResolveContext::with_notifier(false, notifier);
    let s = session(2, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&s));
    assert_eq!(ctx.num_available_doh_servers(&s), 0);

    ctx.set_probe_success(0, true, &s);
    ctx.set_probe_success(1, true, &s);
    ctx.set_probe_success(1, true, &s);
    assert_eq!(dns_changes(&mut rx), 1);

    ctx.set_probe_success(0, false, &s);
    assert_eq!(dns_changes(&mut rx), 0);
    ctx.set_probe_success(1, false, &s);
    assert_eq!(dns_changes(&mut rx), 1);

    // Stale session calls never notify
    let other = session(2, SecureDnsMode::Automatic);
    ctx.set_probe_success(0, true, &other);
    assert_eq!(dns_changes(&mut rx), 0);
}

#[test]
fn test_failure_limit_notifies_when_last_server_drops() {
    let notifier = NetworkChangeNotifier::new();
    let mut rx = notifier.subscribe();
    let ctx = ResolveContext::with_notifier(false, notifier);
    let s = session(1, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&s));
    ctx.set_probe_success(0, true, &s);
    assert_eq!(dns_changes(&mut rx), 1);

    for _ in 0..AUTOMATIC_MODE_FAILURE_LIMIT {
        s.record_server_failure(0, true, &ctx);
    }
    assert!(!ctx.get_doh_server_availability(0, &s));
    assert_eq!(dns_changes(&mut rx), 1);
}

#[test]
fn test_failure_limit_ignores_unbound_context() {
    let bound = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    let unbound = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    let s = session(1, SecureDnsMode::Automatic);
    bound.invalidate_caches(Some(&s));
    bound.set_probe_success(0, true, &s);

    for _ in 0..AUTOMATIC_MODE_FAILURE_LIMIT {
        s.record_server_failure(0, true, &unbound);
    }
    assert!(bound.get_doh_server_availability(0, &s));
    assert_eq!(s.last_doh_failure_count(0), AUTOMATIC_MODE_FAILURE_LIMIT);
}

#[test]
fn test_session_change_lifecycle() {
    let ctx = ResolveContext::new(true);
    let first = session(2, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&first));
    ctx.set_probe_success(0, true, &first);

    let cache = ctx.host_cache().unwrap();
    let now = Instant::now();
    let key = HostCacheKey::new("example.com", DnsQueryType::Unspecified).secure(true);
    let entry = HostCacheEntry::new(vec!["192.0.2.1:0".parse().unwrap()], EntrySource::Dns);
    cache.set(key.clone(), entry, now, Duration::from_secs(300));

    // Same session: cache cleared, probes kept
    ctx.invalidate_caches(Some(&first));
    assert!(cache.is_empty());
    assert_eq!(ctx.num_available_doh_servers(&first), 1);

    // New session: probes reset and the old session is stale
    let second = session(3, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&second));
    assert_eq!(ctx.num_available_doh_servers(&second), 0);
    assert_eq!(ctx.num_available_doh_servers(&first), 0);
    assert!(!ctx.get_doh_server_availability(0, &first));
    assert!(Arc::ptr_eq(&ctx.current_session().unwrap(), &second));

    // Unbind
    ctx.invalidate_caches(None);
    assert!(ctx.current_session().is_none());
    assert_eq!(ctx.doh_server_index_to_use(0, SecureDnsMode::Secure, &second), None);
}

#[test]
fn test_reused_allocation_is_not_confused() {
    let ctx = ResolveContext::with_notifier(false, NetworkChangeNotifier::new());
    let s = session(1, SecureDnsMode::Automatic);
    ctx.invalidate_caches(Some(&s));
    ctx.set_probe_success(0, true, &s);

    // Simulates the session object being recycled for a new configuration
    s.invalidate_weak_refs();
    assert!(!ctx.is_current_session(&s));
    assert_eq!(ctx.doh_server_index_to_use(0, SecureDnsMode::Automatic, &s), None);
    ctx.set_probe_success(0, false, &s);

    ctx.invalidate_caches(Some(&s));
    assert!(ctx.is_current_session(&s));
    assert!(!ctx.get_doh_server_availability(0, &s));
}
