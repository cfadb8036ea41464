//! Ergonomic error context helpers.
//!
//! Provides an extension trait for converting IO errors raised while
//! creating or connecting DNS sockets into `NetError` codes.

use crate::base::neterror::NetError;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;

/// Extension trait for adding socket context to IO Results.
pub trait IoResultExt<T> {
    /// Map an IO error on a socket talking to `server` into a `NetError`.
    ///
    /// # Example
    /// ```ignore
    /// use chromenet_dns::base::context::IoResultExt;
    ///
    /// let socket = std::net::UdpSocket::bind("0.0.0.0:0").socket_context(server)?;
    /// ```
    fn socket_context(self, server: SocketAddr) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn socket_context(self, server: SocketAddr) -> Result<T, NetError> {
        self.map_err(|e| {
            let error = map_io_error(&e);
            tracing::debug!(
                server = %server,
                error = %e,
                code = error.as_i32(),
                "socket operation failed"
            );
            error
        })
    }
}

/// Maps an IO error to the closest network error code.
pub fn map_io_error(error: &io::Error) -> NetError {
    match error.kind() {
        ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
        ErrorKind::ConnectionReset => NetError::ConnectionReset,
        ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
        ErrorKind::NotConnected => NetError::SocketNotConnected,
        ErrorKind::AddrInUse => NetError::AddressInUse,
        ErrorKind::AddrNotAvailable => NetError::AddressInvalid,
        ErrorKind::PermissionDenied => NetError::NetworkAccessDenied,
        ErrorKind::TimedOut => NetError::ConnectionTimedOut,
        ErrorKind::NetworkDown => NetError::InternetDisconnected,
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
            NetError::AddressUnreachable
        }
        ErrorKind::OutOfMemory => NetError::InsufficientResources,
        _ => NetError::ConnectionFailed,
    }
}
