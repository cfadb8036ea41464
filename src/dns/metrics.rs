//! Best-effort DNS transaction metrics.
//!
//! Chromium mapping: `DnsSession::RecordRttForUma` and the provider lookup
//! helpers in net/dns/dns_util.cc
//!
//! Sinks are fire-and-forget: nothing a sink does can change resolver
//! behavior, and sinks cannot report errors back.

use super::config::DohServerConfig;
use crate::base::neterror::NetError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Provider id used for servers not in the well-known table.
pub const OTHER_PROVIDER: &str = "Other";

struct KnownProvider {
    id: &'static str,
    addresses: &'static [IpAddr],
    doh_hosts: &'static [&'static str],
}

const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        id: "Google",
        addresses: &[
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8844)),
        ],
        doh_hosts: &["dns.google", "dns.google.com", "dns64.dns.google"],
    },
    KnownProvider {
        id: "Cloudflare",
        addresses: &[
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            IpAddr::V4(Ipv4Addr::new(1, 0, 0, 1)),
            IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
            IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1001)),
        ],
        doh_hosts: &["cloudflare-dns.com", "chrome.cloudflare-dns.com"],
    },
    KnownProvider {
        id: "Quad9",
        addresses: &[
            IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
            IpAddr::V4(Ipv4Addr::new(149, 112, 112, 112)),
            IpAddr::V6(Ipv6Addr::new(0x2620, 0xfe, 0, 0, 0, 0, 0, 0xfe)),
        ],
        doh_hosts: &["dns.quad9.net", "dns9.quad9.net"],
    },
    KnownProvider {
        id: "CleanBrowsing",
        addresses: &[
            IpAddr::V4(Ipv4Addr::new(185, 228, 168, 168)),
            IpAddr::V4(Ipv4Addr::new(185, 228, 169, 168)),
        ],
        doh_hosts: &["doh.cleanbrowsing.org"],
    },
];

/// Provider id for an insecure nameserver.
pub fn provider_id_for_nameserver(server: &SocketAddr) -> &'static str {
    KNOWN_PROVIDERS
        .iter()
        .find(|p| p.addresses.contains(&server.ip()))
        .map_or(OTHER_PROVIDER, |p| p.id)
}

/// Provider id for a DoH server.
pub fn provider_id_for_doh_server(server: &DohServerConfig) -> &'static str {
    let Some(host) = server.host() else {
        return OTHER_PROVIDER;
    };
    KNOWN_PROVIDERS
        .iter()
        .find(|p| p.doh_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)))
        .map_or(OTHER_PROVIDER, |p| p.id)
}

/// Transport classification of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsQueryKind {
    Insecure,
    /// DoH query against a server with a successful probe.
    SecureValidated,
    /// DoH query against a server without a successful probe.
    SecureNotValidated,
}

impl DnsQueryKind {
    /// Whether the query went to a DoH server.
    pub fn is_secure(self) -> bool {
        !matches!(self, DnsQueryKind::Insecure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DnsQueryKind::Insecure => "Insecure",
            DnsQueryKind::SecureValidated => "SecureValidated",
            DnsQueryKind::SecureNotValidated => "SecureNotValidated",
        }
    }
}

impl fmt::Display for DnsQueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed transaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttRecord {
    pub kind: DnsQueryKind,
    pub provider_id: &'static str,
    pub server_index: usize,
    pub rtt: Duration,
    pub outcome: Result<(), NetError>,
}

impl RttRecord {
    /// A NXDOMAIN answer is still a successful exchange with the server.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Ok(()) | Err(NetError::NameNotResolved))
    }

    /// Histogram name in Chromium's `Net.DNS.DnsTransaction.*` scheme.
    pub fn histogram_name(&self) -> String {
        let suffix = if self.is_success() {
            "SuccessTime"
        } else {
            "FailureTime"
        };
        format!(
            "Net.DNS.DnsTransaction.{}.{}.{}",
            self.kind, self.provider_id, suffix
        )
    }

    /// Name of the error-code histogram. Only failed DoH queries record one.
    pub fn failure_error_histogram_name(&self) -> Option<String> {
        if !self.records_failure_error() {
            return None;
        }
        Some(format!(
            "Net.DNS.DnsTransaction.{}.{}.FailureError",
            self.kind, self.provider_id
        ))
    }

    /// Positive error code recorded alongside
    /// [`failure_error_histogram_name`](Self::failure_error_histogram_name).
    pub fn failure_error_code(&self) -> Option<i32> {
        if !self.records_failure_error() {
            return None;
        }
        self.outcome.err().map(|error| error.as_i32().saturating_abs())
    }

    fn records_failure_error(&self) -> bool {
        self.kind.is_secure() && !self.is_success()
    }
}

/// Receives RTT records.
pub trait DnsMetricsSink: Send + Sync {
    fn record_rtt(&self, record: &RttRecord);
}

/// Default sink: emits records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl DnsMetricsSink for TracingMetricsSink {
    fn record_rtt(&self, record: &RttRecord) {
        tracing::trace!(
            histogram = %record.histogram_name(),
            server = record.server_index,
            rtt_ms = record.rtt.as_millis() as u64,
            "dns transaction rtt"
        );

        if let (Some(histogram), Some(error)) = (
            record.failure_error_histogram_name(),
            record.failure_error_code(),
        ) {
            tracing::trace!(
                histogram = %histogram,
                server = record.server_index,
                error,
                "dns transaction error"
            );
        }
    }
}
