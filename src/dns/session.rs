//! Runtime state for one DNS configuration.
//!
//! Chromium mapping: net/dns/dns_session.h
//!
//! A [`DnsSession`] is created per [`DnsConfig`] and shared through an
//! `Arc` by every in-flight transaction. A configuration change replaces the
//! session; old sessions stay alive only as long as someone still holds
//! them. Server health, rotation and timeouts live here; per-context DoH
//! probe results live in [`ResolveContext`].

use super::config::DnsConfig;
use super::metrics::{
    provider_id_for_doh_server, provider_id_for_nameserver, DnsMetricsSink, DnsQueryKind,
    RttRecord, TracingMetricsSink,
};
use super::resolvecontext::ResolveContext;
use super::rtt::RttBuckets;
use super::serverhealth::{saturated_millis, FailureStamp, ServerHealthTracker};
use super::socketpool::{DnsSocketPool, NullDnsSocketPool};
use crate::base::neterror::NetError;
use crate::base::networkchange::{ConnectionType, NetworkChange, NetworkChangeNotifier};
use crate::socket::client::{DatagramClientSocket, DnsStreamSocket, TokioSocketFactory};
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Default maximum timeout between queries, even with exponential backoff.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive DoH failures after which a server loses its probe-derived
/// availability in AUTOMATIC mode.
pub const AUTOMATIC_MODE_FAILURE_LIMIT: usize = 10;

/// Generates DNS message ids.
pub type QueryIdGenerator = Box<dyn Fn() -> u16 + Send + Sync>;

static NEXT_SESSION_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_SESSION_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Mutable part of a session.
struct SessionState {
    initial_timeout: Duration,
    max_timeout: Duration,
    server_stats: Vec<ServerHealthTracker>,
    doh_server_stats: Vec<ServerHealthTracker>,
    /// Next insecure server to start from when rotating.
    server_index: usize,
    failure_seq: u64,
}

impl SessionState {
    fn stats(&self, server_index: usize, is_doh_server: bool) -> &ServerHealthTracker {
        let stats = if is_doh_server {
            &self.doh_server_stats
        } else {
            &self.server_stats
        };
        assert!(
            server_index < stats.len(),
            "{} server index {server_index} out of range ({} servers)",
            if is_doh_server { "DoH" } else { "insecure" },
            stats.len()
        );
        &stats[server_index]
    }

    fn stats_mut(&mut self, server_index: usize, is_doh_server: bool) -> &mut ServerHealthTracker {
        let stats = if is_doh_server {
            &mut self.doh_server_stats
        } else {
            &mut self.server_stats
        };
        assert!(
            server_index < stats.len(),
            "{} server index {server_index} out of range ({} servers)",
            if is_doh_server { "DoH" } else { "insecure" },
            stats.len()
        );
        &mut stats[server_index]
    }
}

/// Session for one immutable DNS configuration.
pub struct DnsSession {
    config: DnsConfig,
    socket_pool: Box<dyn DnsSocketPool>,
    query_id_generator: QueryIdGenerator,
    metrics: Arc<dyn DnsMetricsSink>,
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

/// Builder for [`DnsSession`].
pub struct DnsSessionBuilder {
    config: DnsConfig,
    socket_pool: Option<Box<dyn DnsSocketPool>>,
    query_id_generator: Option<QueryIdGenerator>,
    metrics: Option<Arc<dyn DnsMetricsSink>>,
    connection_type: ConnectionType,
}

impl DnsSessionBuilder {
    /// Socket pool (default: [`NullDnsSocketPool`] over tokio sockets).
    pub fn socket_pool(mut self, pool: Box<dyn DnsSocketPool>) -> Self {
        self.socket_pool = Some(pool);
        self
    }

    /// Query id source (default: `rand`).
    pub fn query_id_generator(mut self, generator: QueryIdGenerator) -> Self {
        self.query_id_generator = Some(generator);
        self
    }

    /// Metrics sink (default: [`TracingMetricsSink`]).
    pub fn metrics_sink(mut self, sink: Arc<dyn DnsMetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Connection type used for the initial timeouts.
    pub fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn build(self) -> Arc<DnsSession> {
        let mut socket_pool = self
            .socket_pool
            .unwrap_or_else(|| Box::new(NullDnsSocketPool::new(Arc::new(TokioSocketFactory))));
        socket_pool.initialize(&self.config.nameservers);

        let query_id_generator = self
            .query_id_generator
            .unwrap_or_else(|| Box::new(|| rand::thread_rng().gen::<u16>()));

        let (initial_timeout, max_timeout) = timeouts_for(&self.config, self.connection_type);
        let state = SessionState {
            initial_timeout,
            max_timeout,
            server_stats: Vec::new(),
            doh_server_stats: Vec::new(),
            server_index: 0,
            failure_seq: 0,
        };

        let session = DnsSession {
            config: self.config,
            socket_pool,
            query_id_generator,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(TracingMetricsSink)),
            generation: AtomicU64::new(next_generation()),
            state: Mutex::new(state),
        };
        session.initialize_server_stats();

        tracing::debug!(
            nameservers = session.config.nameservers.len(),
            doh_servers = session.config.dns_over_https_servers.len(),
            ?initial_timeout,
            ?max_timeout,
            "created DNS session"
        );
        Arc::new(session)
    }
}

fn timeouts_for(config: &DnsConfig, connection_type: ConnectionType) -> (Duration, Duration) {
    let overrides = &config.timeout_overrides;
    (
        overrides.initial_timeout_for(connection_type, config.timeout),
        overrides.max_timeout_for(connection_type, DEFAULT_MAX_TIMEOUT),
    )
}

impl DnsSession {
    /// Start building a session for `config`.
    pub fn builder(config: DnsConfig) -> DnsSessionBuilder {
        DnsSessionBuilder {
            config,
            socket_pool: None,
            query_id_generator: None,
            metrics: None,
            connection_type: ConnectionType::Unknown,
        }
    }

    /// Session with default collaborators.
    pub fn new(config: DnsConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &DnsConfig {
        &self.config
    }

    /// Identity used by [`ResolveContext`] to recognize this session.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Give the session a fresh identity. Contexts bound to the previous
    /// identity treat this session as a different, unbound one.
    pub fn invalidate_weak_refs(&self) {
        let generation = next_generation();
        self.generation.store(generation, Ordering::Release);
        tracing::debug!(generation, "DNS session identity invalidated");
    }

    pub fn initial_timeout(&self) -> Duration {
        self.state.lock().initial_timeout
    }

    pub fn max_timeout(&self) -> Duration {
        self.state.lock().max_timeout
    }

    /// Random id for the next DNS message.
    pub fn next_query_id(&self) -> u16 {
        (self.query_id_generator)()
    }

    /// Recompute timeouts for a new connection type.
    pub fn update_timeouts(&self, connection_type: ConnectionType) {
        let (initial_timeout, max_timeout) = timeouts_for(&self.config, connection_type);
        let mut state = self.state.lock();
        state.initial_timeout = initial_timeout;
        state.max_timeout = max_timeout;
        tracing::debug!(?connection_type, ?initial_timeout, ?max_timeout, "updated DNS timeouts");
    }

    /// Discard all server health and start over from the current initial
    /// timeout.
    pub fn initialize_server_stats(&self) {
        let buckets = RttBuckets::shared();
        let mut state = self.state.lock();
        let seed = state.initial_timeout;
        state.server_stats = (0..self.config.nameservers.len())
            .map(|_| ServerHealthTracker::new(seed, buckets))
            .collect();
        state.doh_server_stats = (0..self.config.dns_over_https_servers.len())
            .map(|_| ServerHealthTracker::new(seed, buckets))
            .collect();
    }

    /// Network change: new timeouts and fresh server health.
    pub fn on_network_change(&self, connection_type: ConnectionType) {
        self.update_timeouts(connection_type);
        self.initialize_server_stats();
    }

    /// Apply connection type changes from `notifier` until this session is
    /// dropped. The task holds only a weak reference and exits on the first
    /// event after the session is gone, or when the notifier closes.
    pub fn watch_network_changes(
        self: &Arc<Self>,
        notifier: &NetworkChangeNotifier,
    ) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        let mut events = notifier.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(NetworkChange::ConnectionTypeChanged(connection_type)) => {
                        let Some(session) = session.upgrade() else {
                            break;
                        };
                        session.on_network_change(connection_type);
                    }
                    Ok(NetworkChange::DnsChanged) => {
                        if session.strong_count() == 0 {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "network change events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Index of the first server for a new transaction.
    pub fn first_server_index(&self, is_doh_server: bool) -> usize {
        if is_doh_server {
            return 0;
        }

        let mut state = self.state.lock();
        let index = state.server_index;
        let count = self.config.nameservers.len();
        if self.config.rotate && count > 0 {
            state.server_index = (index + 1) % count;
        }
        index
    }

    /// Starting at `starting_server`, the first insecure server with fewer
    /// than `config.attempts` consecutive failures. If every server is over
    /// the limit, the one that failed least recently.
    ///
    /// # Panics
    ///
    /// If `starting_server` is not a valid nameserver index.
    pub fn server_index_to_use(&self, starting_server: usize) -> usize {
        let count = self.config.nameservers.len();
        assert!(
            starting_server < count,
            "insecure server index {starting_server} out of range ({count} servers)"
        );

        let state = self.state.lock();
        let mut index = starting_server;
        let mut oldest: Option<(usize, Option<FailureStamp>)> = None;

        loop {
            let stats = &state.server_stats[index];
            if stats.consecutive_failure_count() < self.config.attempts {
                return index;
            }

            let failure = stats.last_failure();
            if oldest.map_or(true, |(_, oldest_failure)| failure < oldest_failure) {
                oldest = Some((index, failure));
            }

            index = (index + 1) % count;
            if index == starting_server {
                break;
            }
        }

        // Every server is failing: use the one that failed least recently.
        oldest.map_or(starting_server, |(index, _)| index)
    }

    /// Snapshot of one server's health. Later recordings do not affect the
    /// returned copy.
    ///
    /// # Panics
    ///
    /// If `server_index` is out of range.
    pub fn server_health(&self, server_index: usize, is_doh_server: bool) -> ServerHealthTracker {
        self.with_server_health(server_index, is_doh_server, ServerHealthTracker::clone)
    }

    /// Run `f` with the session lock held. `f` must not call back into the
    /// session.
    pub(crate) fn with_server_health<R>(
        &self,
        server_index: usize,
        is_doh_server: bool,
        f: impl FnOnce(&ServerHealthTracker) -> R,
    ) -> R {
        let state = self.state.lock();
        f(state.stats(server_index, is_doh_server))
    }

    pub fn last_doh_failure(&self, server_index: usize) -> Option<Instant> {
        self.with_server_health(server_index, true, |s| s.last_failure_time())
    }

    pub fn last_doh_failure_count(&self, server_index: usize) -> usize {
        self.with_server_health(server_index, true, |s| s.consecutive_failure_count())
    }

    pub(crate) fn doh_failure_snapshot(
        &self,
        server_index: usize,
    ) -> (usize, Option<FailureStamp>) {
        self.with_server_health(server_index, true, |s| {
            (s.consecutive_failure_count(), s.last_failure())
        })
    }

    /// Record a failed or timed out attempt.
    ///
    /// Reaching [`AUTOMATIC_MODE_FAILURE_LIMIT`] consecutive failures on a
    /// DoH server marks it unavailable in `resolve_context`, provided this
    /// session is the context's current one.
    pub fn record_server_failure(
        &self,
        server_index: usize,
        is_doh_server: bool,
        resolve_context: &ResolveContext,
    ) {
        let failure_count = {
            let mut state = self.state.lock();
            state.failure_seq += 1;
            let stamp = FailureStamp { at: Instant::now(), seq: state.failure_seq };
            state.stats_mut(server_index, is_doh_server).record_failure(stamp)
        };

        tracing::debug!(server = server_index, is_doh_server, failure_count, "DNS server failure");

        if is_doh_server && failure_count >= AUTOMATIC_MODE_FAILURE_LIMIT {
            resolve_context.set_probe_success(server_index, false, self);
        }
    }

    /// Record a successful attempt.
    ///
    /// DoH failure counts are left alone: DoH servers are shared by several
    /// contexts and one context's success must not hide another's failures.
    pub fn record_server_success(&self, server_index: usize, is_doh_server: bool) {
        let mut state = self.state.lock();
        state
            .stats_mut(server_index, is_doh_server)
            .record_success(Instant::now(), !is_doh_server);
    }

    /// Record an observed round trip time. Negative values count as zero.
    pub fn record_rtt(
        &self,
        server_index: usize,
        is_doh_server: bool,
        is_validated_doh_server: bool,
        rtt: time::Duration,
        outcome: Result<(), NetError>,
    ) {
        let rtt = if rtt.is_negative() {
            Duration::ZERO
        } else {
            rtt.unsigned_abs()
        };

        {
            let mut state = self.state.lock();
            state.stats_mut(server_index, is_doh_server).record_rtt(saturated_millis(rtt));
        }

        self.record_rtt_metrics(server_index, is_doh_server, is_validated_doh_server, rtt, outcome);
    }

    fn record_rtt_metrics(
        &self,
        server_index: usize,
        is_doh_server: bool,
        is_validated_doh_server: bool,
        rtt: Duration,
        outcome: Result<(), NetError>,
    ) {
        let (kind, provider_id) = if is_doh_server {
            let kind = if is_validated_doh_server {
                DnsQueryKind::SecureValidated
            } else {
                DnsQueryKind::SecureNotValidated
            };
            (kind, provider_id_for_doh_server(&self.config.dns_over_https_servers[server_index]))
        } else {
            debug_assert!(!is_validated_doh_server);
            (
                DnsQueryKind::Insecure,
                provider_id_for_nameserver(&self.config.nameservers[server_index]),
            )
        };

        self.metrics.record_rtt(&RttRecord { kind, provider_id, server_index, rtt, outcome });
    }

    /// Timeout for `attempt` against insecure server `server_index`. The
    /// backoff exponent grows once per full pass over all nameservers.
    pub fn next_timeout(&self, server_index: usize, attempt: usize) -> Duration {
        let count = self.config.nameservers.len().max(1);
        let num_backoffs = u32::try_from(attempt / count).unwrap_or(u32::MAX);
        let state = self.state.lock();
        state
            .stats(server_index, false)
            .next_timeout(state.initial_timeout, state.max_timeout, num_backoffs)
    }

    /// Timeout for DoH server `doh_server_index`. DoH never backs off here.
    pub fn next_doh_timeout(&self, doh_server_index: usize) -> Duration {
        let state = self.state.lock();
        state
            .stats(doh_server_index, true)
            .next_timeout(state.initial_timeout, state.max_timeout, 0)
    }

    /// Lease a connected datagram socket for `server_index`.
    ///
    /// Returns `None` when the pool cannot provide one; the caller should
    /// retry later or try another server.
    pub fn allocate_socket(self: &Arc<Self>, server_index: usize) -> Option<SocketLease> {
        let Some(socket) = self.socket_pool.allocate_socket(server_index) else {
            tracing::warn!(server = server_index, "no DNS socket available");
            return None;
        };

        tracing::trace!(server = server_index, remote = %socket.remote_addr(), "socket in use");
        Some(SocketLease { session: Arc::clone(self), server_index, socket: Some(socket) })
    }

    /// Unpooled stream socket for one TCP transaction.
    pub fn create_stream_socket(&self, server_index: usize) -> Box<dyn DnsStreamSocket> {
        self.socket_pool.create_tcp_socket(server_index)
    }

    fn free_socket(&self, server_index: usize, socket: Box<dyn DatagramClientSocket>) {
        tracing::trace!(server = server_index, remote = %socket.remote_addr(), "socket freed");
        self.socket_pool.free_socket(server_index, socket);
    }
}

impl fmt::Debug for DnsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsSession")
            .field("generation", &self.generation())
            .field("nameservers", &self.config.nameservers)
            .field("doh_servers", &self.config.dns_over_https_servers.len())
            .finish_non_exhaustive()
    }
}

/// A datagram socket on loan from a session's pool.
///
/// Dropping the lease returns the socket to the pool.
pub struct SocketLease {
    session: Arc<DnsSession>,
    server_index: usize,
    socket: Option<Box<dyn DatagramClientSocket>>,
}

impl SocketLease {
    pub fn server_index(&self) -> usize {
        self.server_index
    }

    pub fn socket(&self) -> &dyn DatagramClientSocket {
        // Only taken in Drop.
        match &self.socket {
            Some(socket) => socket.as_ref(),
            None => unreachable!("socket lease used after release"),
        }
    }

    /// Session the socket came from.
    pub fn session(&self) -> &Arc<DnsSession> {
        &self.session
    }
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            self.session.free_socket(self.server_index, socket);
        }
    }
}

impl fmt::Debug for SocketLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketLease")
            .field("server_index", &self.server_index)
            .field("socket", &self.socket)
            .finish()
    }
}

/// Weak handle used by long-lived holders to detect session replacement.
pub(crate) struct SessionHandle {
    session: Weak<DnsSession>,
    generation: u64,
}

impl SessionHandle {
    pub(crate) fn new(session: &Arc<DnsSession>) -> Self {
        Self { session: Arc::downgrade(session), generation: session.generation() }
    }

    /// Whether `session` is the live session this handle was created for,
    /// with an unchanged identity.
    pub(crate) fn matches(&self, session: &DnsSession) -> bool {
        std::ptr::eq(self.session.as_ptr(), session)
            && self.session.strong_count() > 0
            && self.generation == session.generation()
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<DnsSession>> {
        self.session.upgrade().filter(|s| s.generation() == self.generation)
    }
}
