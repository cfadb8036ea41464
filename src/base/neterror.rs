use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // System errors
    #[error("Insufficient resources")]
    InsufficientResources,
    #[error("Operation aborted")]
    Aborted,
    #[error("Operation timed out")]
    TimedOut,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Internet disconnected")]
    InternetDisconnected,
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Network access denied")]
    NetworkAccessDenied,
    #[error("Address in use")]
    AddressInUse,

    // DNS Errors
    #[error("DNS malformed response")]
    DnsMalformedResponse,
    #[error("DNS server requires TCP")]
    DnsServerRequiresTcp,
    #[error("DNS server failed")]
    DnsServerFailed,
    #[error("DNS transaction timed out")]
    DnsTimedOut,
    #[error("DNS cache miss")]
    DnsCacheMiss,
    #[error("DNS search list empty")]
    DnsSearchEmpty,
    #[error("DNS sort error")]
    DnsSortError,
    #[error("DNS secure resolver hostname resolution failed")]
    DnsSecureResolverHostnameResolutionFailed,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::InsufficientResources => -12,
            NetError::Aborted => -3,
            NetError::TimedOut => -7,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::InternetDisconnected => -106,
            NetError::AddressInvalid => -108,
            NetError::AddressUnreachable => -109,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::NetworkAccessDenied => -138,
            NetError::AddressInUse => -147,
            NetError::DnsMalformedResponse => -800,
            NetError::DnsServerRequiresTcp => -801,
            NetError::DnsServerFailed => -802,
            NetError::DnsTimedOut => -803,
            NetError::DnsCacheMiss => -804,
            NetError::DnsSearchEmpty => -805,
            NetError::DnsSortError => -806,
            NetError::DnsSecureResolverHostnameResolutionFailed => -808,
            NetError::Unknown(code) => *code,
        }
    }

    /// Whether this code lives in the DNS range (-800 to -899).
    pub fn is_dns_error(&self) -> bool {
        (-899..=-800).contains(&self.as_i32())
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -7 => NetError::TimedOut,
            -12 => NetError::InsufficientResources,

            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -106 => NetError::InternetDisconnected,
            -108 => NetError::AddressInvalid,
            -109 => NetError::AddressUnreachable,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -138 => NetError::NetworkAccessDenied,
            -147 => NetError::AddressInUse,

            -800 => NetError::DnsMalformedResponse,
            -801 => NetError::DnsServerRequiresTcp,
            -802 => NetError::DnsServerFailed,
            -803 => NetError::DnsTimedOut,
            -804 => NetError::DnsCacheMiss,
            -805 => NetError::DnsSearchEmpty,
            -806 => NetError::DnsSortError,
            -808 => NetError::DnsSecureResolverHostnameResolutionFailed,
            _ => NetError::Unknown(code),
        }
    }
}
