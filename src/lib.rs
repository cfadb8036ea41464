//! # chromenet-dns
//!
//! The DNS session layer of a Chromium-inspired network stack.
//!
//! `chromenet-dns` decides which DNS server a transaction should try next,
//! how long it should wait, and which DNS-over-HTTPS servers a request
//! context may use, following the behavior of Chromium's `net/dns/`.
//!
//! ## Features
//!
//! - **Server Health**: consecutive failures and an RTT histogram per server
//! - **Adaptive Timeouts**: 99th percentile RTT with exponential backoff
//! - **Server Rotation**: round-robin with least-recently-failed fallback
//! - **DoH Availability**: per-context probe results bound to one session
//! - **Socket Leasing**: pooled UDP sockets returned on drop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chromenet_dns::dns::{DnsConfig, DnsSession, ResolveContext};
//!
//! let config = DnsConfig::from_json_file("dns.json")?;
//! let session = DnsSession::new(config);
//! let context = ResolveContext::new(true);
//! context.invalidate_caches(Some(&session));
//!
//! let server = session.server_index_to_use(session.first_server_index(false));
//! session.record_server_success(server, false);
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and network change notifications
//! - [`dns`] - Sessions, resolve contexts and server health
//! - [`socket`] - Socket abstractions used by the DNS layer

pub mod base;
pub mod dns;
pub mod socket;
