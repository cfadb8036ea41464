//! DNS session and resolve-context layer
//!
//! Tracks per-server health for a DNS configuration and decides which server
//! to try next and how long to wait for it.
//!
//! # Architecture
//!
//! Mirrors Chromium's `DnsSession` / `ResolveContext` split:
//! - [`DnsSession`]: one per [`DnsConfig`], shared via `Arc` by in-flight
//!   transactions and replaced wholesale when the configuration changes
//! - [`ResolveContext`]: one per request context, outlives sessions and
//!   holds DoH probe results for whichever session it is bound to
//! - [`ServerHealthTracker`]: failure counters and RTT histogram per server
//!
//! # Example
//!
//! ```rust,ignore
//! use chromenet_dns::dns::{DnsConfig, DnsSession, ResolveContext};
//!
//! let session = DnsSession::new(DnsConfig::new().nameservers(servers));
//! let context = ResolveContext::new(true);
//! context.invalidate_caches(Some(&session));
//!
//! let server = session.server_index_to_use(session.first_server_index(false));
//! let timeout = session.next_timeout(server, 0);
//! if let Some(lease) = session.allocate_socket(server) {
//!     // send the query on lease.socket() within `timeout`
//! }
//! ```

pub mod config;
pub mod hostcache;
pub mod metrics;
pub mod resolvecontext;
pub mod rtt;
pub mod serverhealth;
pub mod session;
pub mod socketpool;

pub use config::{ConfigError, DnsConfig, DohServerConfig, SecureDnsMode, TimeoutOverrides};
pub use hostcache::{DnsQueryType, HostCache, HostCacheEntry, HostCacheKey};
pub use metrics::{DnsMetricsSink, DnsQueryKind, RttRecord, TracingMetricsSink};
pub use resolvecontext::ResolveContext;
pub use rtt::{RttBuckets, RttHistogram};
pub use serverhealth::{FailureStamp, ServerHealthTracker};
pub use session::{DnsSession, DnsSessionBuilder, SocketLease, AUTOMATIC_MODE_FAILURE_LIMIT};
pub use socketpool::{DefaultDnsSocketPool, DnsSocketPool, NullDnsSocketPool};
