use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use futures::future::BoxFuture;
use std::fmt;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};

/// A datagram socket already connected to one DNS server.
/// Mimics net::DatagramClientSocket.
pub trait DatagramClientSocket: Send + Sync + fmt::Debug {
    /// Address of the server this socket is connected to.
    fn remote_addr(&self) -> SocketAddr;

    /// Returns true if the socket can still be used.
    fn is_connected(&self) -> bool;

    /// Send one datagram.
    fn send<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, Result<usize, NetError>>;

    /// Receive one datagram.
    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, Result<usize, NetError>>;
}

/// A one-shot stream socket used for TCP fallback. Created unconnected.
/// Mimics net::StreamSocket.
pub trait DnsStreamSocket: Send + fmt::Debug {
    /// Address of the server this socket targets.
    fn remote_addr(&self) -> SocketAddr;

    /// Returns true once `connect` has succeeded.
    fn is_connected(&self) -> bool;

    /// Establish the connection.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), NetError>>;
}

/// Creates sockets for DNS servers.
pub trait ClientSocketFactory: Send + Sync {
    fn create_datagram_socket(
        &self,
        server: SocketAddr,
    ) -> Result<Box<dyn DatagramClientSocket>, NetError>;

    fn create_stream_socket(&self, server: SocketAddr) -> Box<dyn DnsStreamSocket>;
}

/// Connected UDP socket on the tokio reactor.
#[derive(Debug)]
pub struct UdpClientSocket {
    socket: tokio::net::UdpSocket,
    remote: SocketAddr,
}

impl UdpClientSocket {
    /// Bind an ephemeral local port and connect it to `server`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(server: SocketAddr) -> Result<Self, NetError> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = StdUdpSocket::bind(local).socket_context(server)?;
        socket.connect(server).socket_context(server)?;
        socket.set_nonblocking(true).socket_context(server)?;
        let socket = tokio::net::UdpSocket::from_std(socket).socket_context(server)?;
        Ok(Self { socket, remote: server })
    }
}

impl DatagramClientSocket for UdpClientSocket {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_connected(&self) -> bool {
        // peer_addr() returns Err once the socket is disconnected
        self.socket.peer_addr().is_ok()
    }

    fn send<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, Result<usize, NetError>> {
        Box::pin(async move { self.socket.send(buf).await.socket_context(self.remote) })
    }

    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, Result<usize, NetError>> {
        Box::pin(async move { self.socket.recv(buf).await.socket_context(self.remote) })
    }
}

/// TCP socket that connects lazily.
#[derive(Debug)]
pub struct TcpClientSocket {
    remote: SocketAddr,
    stream: Option<tokio::net::TcpStream>,
}

impl TcpClientSocket {
    pub fn new(remote: SocketAddr) -> Self {
        Self { remote, stream: None }
    }

    /// Consume and return the connected stream, if any.
    pub fn into_inner(self) -> Option<tokio::net::TcpStream> {
        self.stream
    }
}

impl DnsStreamSocket for TcpClientSocket {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn is_connected(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.peer_addr().is_ok())
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), NetError>> {
        Box::pin(async move {
            let stream = tokio::net::TcpStream::connect(self.remote)
                .await
                .socket_context(self.remote)?;
            self.stream = Some(stream);
            Ok(())
        })
    }
}

/// Socket factory backed by tokio sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSocketFactory;

impl ClientSocketFactory for TokioSocketFactory {
    fn create_datagram_socket(
        &self,
        server: SocketAddr,
    ) -> Result<Box<dyn DatagramClientSocket>, NetError> {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!(server = %server, "no tokio runtime, cannot create UDP socket");
            return Err(NetError::InsufficientResources);
        }
        Ok(Box::new(UdpClientSocket::connect(server)?))
    }

    fn create_stream_socket(&self, server: SocketAddr) -> Box<dyn DnsStreamSocket> {
        Box::new(TcpClientSocket::new(server))
    }
}
