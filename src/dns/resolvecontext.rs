//! Per-request-context resolver state that outlives DNS sessions.
//!
//! Chromium mapping: net/dns/resolve_context.h
//!
//! A context binds to at most one [`DnsSession`] at a time through a weak
//! handle. Every query method takes the session the caller holds and
//! degrades to "unavailable" when it is not the bound one, so a stale
//! session can never disturb state that belongs to its replacement.

use super::config::SecureDnsMode;
use super::hostcache::HostCache;
use super::session::{DnsSession, SessionHandle};
use super::serverhealth::FailureStamp;
use crate::base::neterror::NetError;
use crate::base::networkchange::NetworkChangeNotifier;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct ContextState {
    current_session: Option<SessionHandle>,
    /// Probe results, index-aligned with the bound session's DoH servers.
    doh_server_availability: Vec<bool>,
}

impl ContextState {
    fn is_current(&self, session: &DnsSession) -> bool {
        self.current_session.as_ref().is_some_and(|h| h.matches(session))
    }

    fn num_available(&self) -> usize {
        self.doh_server_availability.iter().filter(|&&a| a).count()
    }
}

/// Long-lived DNS state for one request context.
pub struct ResolveContext {
    host_cache: Option<HostCache>,
    notifier: NetworkChangeNotifier,
    state: Mutex<ContextState>,
}

impl ResolveContext {
    /// Context reporting DoH availability changes on the process-wide
    /// notifier.
    pub fn new(enable_caching: bool) -> Self {
        Self::with_notifier(enable_caching, NetworkChangeNotifier::global().clone())
    }

    pub fn with_notifier(enable_caching: bool, notifier: NetworkChangeNotifier) -> Self {
        Self {
            host_cache: enable_caching.then(HostCache::new),
            notifier,
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn host_cache(&self) -> Option<&HostCache> {
        self.host_cache.as_ref()
    }

    /// The bound session, if it is still alive.
    pub fn current_session(&self) -> Option<Arc<DnsSession>> {
        self.state.lock().current_session.as_ref().and_then(SessionHandle::upgrade)
    }

    pub fn is_current_session(&self, session: &DnsSession) -> bool {
        self.state.lock().is_current(session)
    }

    /// DoH server to use for the next attempt, scanning round-robin from
    /// `starting_doh_server_index`.
    ///
    /// In [`SecureDnsMode::Secure`] every server is eligible; otherwise only
    /// servers with a successful probe are. Among eligible servers the first
    /// one under `config.attempts` consecutive failures wins, falling back to
    /// the one that failed least recently. `None` when nothing is eligible
    /// or `session` is not the bound session.
    pub fn doh_server_index_to_use(
        &self,
        starting_doh_server_index: usize,
        secure_dns_mode: SecureDnsMode,
        session: &DnsSession,
    ) -> Option<usize> {
        let state = self.state.lock();
        if !state.is_current(session) {
            return None;
        }

        let count = session.config().dns_over_https_servers.len();
        if count == 0 {
            return None;
        }
        assert!(
            starting_doh_server_index < count,
            "DoH server index {starting_doh_server_index} out of range ({count} servers)"
        );

        let attempts = session.config().attempts;
        let mut index = starting_doh_server_index;
        let mut oldest: Option<(usize, Option<FailureStamp>)> = None;

        loop {
            let eligible = secure_dns_mode == SecureDnsMode::Secure
                || state.doh_server_availability.get(index).copied().unwrap_or(false);

            if eligible {
                let (failures, last_failure) = session.doh_failure_snapshot(index);
                if failures < attempts {
                    return Some(index);
                }
                if oldest.map_or(true, |(_, oldest_failure)| last_failure < oldest_failure) {
                    oldest = Some((index, last_failure));
                }
            }

            index = (index + 1) % count;
            if index == starting_doh_server_index {
                break;
            }
        }

        oldest.map(|(index, _)| index)
    }

    /// Number of DoH servers with a successful probe; 0 for a stale session.
    pub fn num_available_doh_servers(&self, session: &DnsSession) -> usize {
        let state = self.state.lock();
        if !state.is_current(session) {
            return 0;
        }
        state.num_available()
    }

    pub fn get_doh_server_availability(
        &self,
        doh_server_index: usize,
        session: &DnsSession,
    ) -> bool {
        let state = self.state.lock();
        if !state.is_current(session) {
            return false;
        }
        assert!(
            doh_server_index < state.doh_server_availability.len(),
            "DoH server index {doh_server_index} out of range ({} servers)",
            state.doh_server_availability.len()
        );
        state.doh_server_availability[doh_server_index]
    }

    /// Record a probe result for one DoH server.
    ///
    /// Emits a DNS change on the notifier when the context goes from no
    /// available DoH servers to some, or back.
    pub fn set_probe_success(&self, doh_server_index: usize, success: bool, session: &DnsSession) {
        let changed = {
            let mut state = self.state.lock();
            if !state.is_current(session) {
                return;
            }
            assert!(
                doh_server_index < state.doh_server_availability.len(),
                "DoH server index {doh_server_index} out of range ({} servers)",
                state.doh_server_availability.len()
            );

            let was_available = state.num_available() > 0;
            state.doh_server_availability[doh_server_index] = success;
            let is_available = state.num_available() > 0;
            was_available != is_available
        };

        tracing::debug!(server = doh_server_index, success, "DoH probe result");
        if changed {
            self.notifier.trigger_non_system_dns_change();
        }
    }

    /// Forward a failed attempt to `session` if it is the bound session.
    pub fn record_server_failure(
        &self,
        server_index: usize,
        is_doh_server: bool,
        session: &DnsSession,
    ) {
        if !self.is_current_session(session) {
            return;
        }
        session.record_server_failure(server_index, is_doh_server, self);
    }

    /// Forward a successful attempt to `session` if it is the bound session.
    pub fn record_server_success(
        &self,
        server_index: usize,
        is_doh_server: bool,
        session: &DnsSession,
    ) {
        if !self.is_current_session(session) {
            return;
        }
        session.record_server_success(server_index, is_doh_server);
    }

    /// Forward an RTT sample to `session` if it is the bound session. DoH
    /// samples are classified by this context's probe result for the server.
    pub fn record_rtt(
        &self,
        server_index: usize,
        is_doh_server: bool,
        rtt: time::Duration,
        outcome: Result<(), NetError>,
        session: &DnsSession,
    ) {
        if !self.is_current_session(session) {
            return;
        }
        let is_validated = is_doh_server && self.get_doh_server_availability(server_index, session);
        session.record_rtt(server_index, is_doh_server, is_validated, rtt, outcome);
    }

    /// Clear the host cache and bind to `new_session`.
    ///
    /// Rebinding to the already bound session keeps the probe results;
    /// a different session starts with every DoH server unavailable.
    pub fn invalidate_caches(&self, new_session: Option<&Arc<DnsSession>>) {
        if let Some(cache) = &self.host_cache {
            cache.invalidate();
        }

        let mut state = self.state.lock();
        match new_session {
            None => {
                state.current_session = None;
                state.doh_server_availability.clear();
            }
            Some(session) if state.is_current(session) => {}
            Some(session) => {
                tracing::debug!(generation = session.generation(), "resolve context rebound");
                state.current_session = Some(SessionHandle::new(session));
                state.doh_server_availability =
                    vec![false; session.config().dns_over_https_servers.len()];
            }
        }
    }
}

impl fmt::Debug for ResolveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResolveContext")
            .field("bound", &state.current_session.is_some())
            .field("doh_server_availability", &state.doh_server_availability)
            .field("host_cache", &self.host_cache.as_ref().map(HostCache::len))
            .finish()
    }
}
